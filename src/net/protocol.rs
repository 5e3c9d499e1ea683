use serde::{Deserialize, Serialize};

use crate::scripting::action::ActionOutcome;
use crate::world::quest::{ActionError, Quest};

/// Inbound frames: a connect registration or an action request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Connect {
        connect: String,
    },
    Action {
        player: String,
        action_type: String,
        #[serde(default)]
        target_1: String,
        #[serde(default)]
        target_2: String,
    },
}

pub fn parse_client_message(payload: &str) -> Result<ClientMessage, String> {
    serde_json::from_str(payload).map_err(|err| format!("invalid message: {}", err))
}

/// What the player currently perceives: their location, its image, the
/// sibling objects around them and their own inventory. Merged into every
/// successful response so clients can redraw without a second round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ambient {
    pub location: String,
    pub image: String,
    pub surroundings: Vec<String>,
    pub inventory: Vec<String>,
}

pub fn ambient_for(quest: &Quest, player_id: &str) -> Option<Ambient> {
    let player = quest.objects.get(player_id)?;
    let location_id = player.parent.clone()?;
    let location = quest.objects.get(&location_id)?;
    Some(Ambient {
        location: location.label(&location_id).to_string(),
        image: location.image.clone(),
        surroundings: location
            .contents
            .iter()
            .filter(|id| id.as_str() != player_id)
            .map(|id| quest.label(id))
            .collect(),
        inventory: player.contents.iter().map(|id| quest.label(id)).collect(),
    })
}

#[derive(Debug, Serialize)]
struct ResultMessage<'a> {
    message: &'a str,
    success: bool,
    #[serde(flatten)]
    ambient: Option<&'a Ambient>,
}

#[derive(Debug, Serialize)]
struct ErrorMessage<'a> {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    inventory: Option<&'a Vec<String>>,
}

#[derive(Debug, Serialize)]
struct RefreshMessage<'a> {
    update: &'a Ambient,
}

fn encode<T: Serialize>(message: &T) -> String {
    serde_json::to_string(message)
        .unwrap_or_else(|_| r#"{"error":"internal serialization failure"}"#.to_string())
}

pub fn result_frame(outcome: &ActionOutcome, ambient: Option<&Ambient>) -> String {
    encode(&ResultMessage {
        message: outcome.message.as_deref().unwrap_or(""),
        success: outcome.success,
        ambient,
    })
}

pub fn error_frame(err: &ActionError) -> String {
    let inventory = match err {
        ActionError::PreconditionFailed { inventory, .. } => Some(inventory),
        _ => None,
    };
    encode(&ErrorMessage {
        error: err.to_string(),
        inventory,
    })
}

/// A transport-level error that never reached the resolver.
pub fn plain_error(detail: &str) -> String {
    encode(&ErrorMessage {
        error: detail.to_string(),
        inventory: None,
    })
}

pub fn welcome_frame(player: &str, ambient: Option<&Ambient>) -> String {
    encode(&ResultMessage {
        message: &format!("Welcome, {}!", player),
        success: true,
        ambient,
    })
}

/// Pushed to the other connected players after the shared world changed
/// under them.
pub fn refresh_frame(ambient: &Ambient) -> String {
    encode(&RefreshMessage { update: ambient })
}
