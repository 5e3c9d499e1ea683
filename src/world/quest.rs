use std::collections::HashMap;

use crate::scripting::action::{ActionNode, ActionOutcome, EffectNode};
use crate::scripting::expr::{eval, Context, EvalError};
use crate::scripting::value::AttrValue;
use crate::world::object::GameObject;

/// The built-in action vocabulary. Anything else is a custom type dispatched
/// through the target's action table with no structural consequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionType {
    View,
    Take,
    Put,
    Enter,
    Send,
    Custom(String),
}

impl ActionType {
    pub fn parse(raw: &str) -> ActionType {
        match raw {
            "view" => ActionType::View,
            "take" => ActionType::Take,
            "put" => ActionType::Put,
            "enter" => ActionType::Enter,
            "send" => ActionType::Send,
            other => ActionType::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionType::View => "view",
            ActionType::Take => "take",
            ActionType::Put => "put",
            ActionType::Enter => "enter",
            ActionType::Send => "send",
            ActionType::Custom(other) => other,
        }
    }
}

/// Every way a single action resolution can fail. All of these come back as
/// data; the session stays alive. `InvariantViolation` marks a broken action
/// table or engine bug and aborts only the current request.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionError {
    UnknownPlayer { player: String },
    UnknownTarget { target: String },
    Unreachable { target: String },
    PreconditionFailed { object: String, inventory: Vec<String> },
    UnsupportedAction { target: String, action_type: String },
    Evaluation(EvalError),
    InvariantViolation(String),
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionError::UnknownPlayer { player } => {
                write!(f, "player '{}' is not part of this quest", player)
            }
            ActionError::UnknownTarget { target } => {
                write!(f, "there is no object '{}'", target)
            }
            ActionError::Unreachable { target } => {
                write!(f, "'{}' is not reachable from here", target)
            }
            ActionError::PreconditionFailed { object, .. } => {
                write!(f, "'{}' must be in the player's inventory", object)
            }
            ActionError::UnsupportedAction {
                target,
                action_type,
            } => write!(f, "'{}' does not support action '{}'", target, action_type),
            ActionError::Evaluation(err) => write!(f, "condition evaluation failed: {}", err),
            ActionError::InvariantViolation(detail) => {
                write!(f, "containment invariant violated: {}", detail)
            }
        }
    }
}

impl std::error::Error for ActionError {}

impl From<EvalError> for ActionError {
    fn from(err: EvalError) -> Self {
        ActionError::Evaluation(err)
    }
}

/// The aggregate root: the object graph, the global attributes and the
/// player roster of one running quest. Constructed once by the script
/// loader and mutated for the lifetime of the session. Callers must
/// serialize `perform_action` invocations (the server holds its mutex for
/// the whole call).
#[derive(Debug, Clone, Default)]
pub struct Quest {
    pub title: String,
    pub meta: AttrValue,
    pub gattrs: HashMap<String, AttrValue>,
    pub objects: HashMap<String, GameObject>,
    pub players: Vec<String>,
    pub end_actions: HashMap<String, AttrValue>,
}

impl Quest {
    pub fn is_player(&self, id: &str) -> bool {
        self.players.iter().any(|player| player == id)
    }

    /// Display name for an object id, falling back to the id itself.
    pub fn label(&self, id: &str) -> String {
        match self.objects.get(id) {
            Some(object) => object.label(id).to_string(),
            None => id.to_string(),
        }
    }

    /// Remove `object_id` from `from_id`'s contents and append it to
    /// `to_id`'s. The caller must guarantee the object is currently inside
    /// `from_id`; anything else is an invariant violation. The destination
    /// is checked before the source is touched so a failed move never drops
    /// an object out of the graph.
    pub fn move_object(
        &mut self,
        object_id: &str,
        from_id: &str,
        to_id: &str,
    ) -> Result<(), ActionError> {
        if !self.objects.contains_key(to_id) {
            return Err(ActionError::InvariantViolation(format!(
                "move destination '{}' does not exist",
                to_id
            )));
        }
        let from = self.objects.get_mut(from_id).ok_or_else(|| {
            ActionError::InvariantViolation(format!("move source '{}' does not exist", from_id))
        })?;
        let position = from
            .contents
            .iter()
            .position(|entry| entry == object_id)
            .ok_or_else(|| {
                ActionError::InvariantViolation(format!(
                    "'{}' is not inside '{}'",
                    object_id, from_id
                ))
            })?;
        from.contents.remove(position);
        if let Some(to) = self.objects.get_mut(to_id) {
            to.contents.push(object_id.to_string());
        }
        Ok(())
    }

    /// The only way a player's location changes: relocates the player object
    /// and updates its `parent` in one step, keeping both sides of the
    /// containment invariant in sync.
    pub fn move_player(&mut self, player_id: &str, to_id: &str) -> Result<(), ActionError> {
        let current = self
            .objects
            .get(player_id)
            .and_then(|player| player.parent.clone())
            .ok_or_else(|| {
                ActionError::InvariantViolation(format!(
                    "player '{}' has no current location",
                    player_id
                ))
            })?;
        self.move_object(player_id, &current, to_id)?;
        if let Some(player) = self.objects.get_mut(player_id) {
            player.parent = Some(to_id.to_string());
        }
        Ok(())
    }

    /// Flat evaluation context for one object: its own fields merged with
    /// the global attributes, globals winning on collision.
    pub fn object_context(&self, id: &str) -> Context {
        let mut context = Context::new();
        if let Some(object) = self.objects.get(id) {
            context.insert("name".to_string(), AttrValue::Str(object.name.clone()));
            context.insert("image".to_string(), AttrValue::Str(object.image.clone()));
            context.insert(
                "objects".to_string(),
                AttrValue::List(
                    object
                        .contents
                        .iter()
                        .map(|entry| AttrValue::Str(entry.clone()))
                        .collect(),
                ),
            );
            context.insert(
                "parent".to_string(),
                match &object.parent {
                    Some(parent) => AttrValue::Str(parent.clone()),
                    None => AttrValue::Null,
                },
            );
        }
        for (key, value) in &self.gattrs {
            context.insert(key.clone(), value.clone());
        }
        context
    }

    /// Resolve and execute one player action against the graph.
    ///
    /// The pipeline: player lookup, the `enter`-with-no-target exit
    /// shortcut, target defaulting, existence and reachability checks, the
    /// `put` inventory precondition, action-table dispatch, then the
    /// action type's built-in structural effect once the table run
    /// succeeded. Failures come back as `ActionError` data; the graph is
    /// untouched for every pre-execution check.
    pub fn perform_action(
        &mut self,
        player_id: &str,
        action_type: &str,
        target_1: &str,
        target_2: &str,
    ) -> Result<ActionOutcome, ActionError> {
        if !self.is_player(player_id) || !self.objects.contains_key(player_id) {
            return Err(ActionError::UnknownPlayer {
                player: player_id.to_string(),
            });
        }
        let location_id = self
            .objects
            .get(player_id)
            .and_then(|player| player.parent.clone())
            .ok_or_else(|| {
                ActionError::InvariantViolation(format!(
                    "player '{}' has no current location",
                    player_id
                ))
            })?;
        let action = ActionType::parse(action_type);

        // Leaving the current location: `enter` with no target climbs to the
        // parent location when there is one, without consulting any action
        // table.
        if action == ActionType::Enter && target_1.is_empty() {
            let outer = self
                .objects
                .get(&location_id)
                .and_then(|location| location.parent.clone());
            if let Some(outer_id) = outer {
                let left = self.label(&location_id);
                self.move_player(player_id, &outer_id)?;
                return Ok(ActionOutcome {
                    success: true,
                    message: Some(format!("You leave {}.", left)),
                });
            }
        }

        let target_id = if target_1.is_empty() {
            location_id.clone()
        } else {
            target_1.to_string()
        };

        if !self.objects.contains_key(&target_id) {
            return Err(ActionError::UnknownTarget { target: target_id });
        }

        let visible = target_id == location_id
            || self
                .objects
                .get(&location_id)
                .map(|location| location.contains(&target_id))
                .unwrap_or(false);
        if !visible {
            return Err(ActionError::Unreachable { target: target_id });
        }

        if action == ActionType::Put {
            let inventory = self
                .objects
                .get(player_id)
                .map(|player| player.contents.clone())
                .unwrap_or_default();
            if target_2.is_empty() || !inventory.iter().any(|entry| entry == target_2) {
                return Err(ActionError::PreconditionFailed {
                    object: target_2.to_string(),
                    inventory,
                });
            }
        }

        let nodes = match self
            .objects
            .get(&target_id)
            .and_then(|target| target.actions.get(action.as_str()))
        {
            Some(nodes) => nodes.clone(),
            None => {
                return Err(ActionError::UnsupportedAction {
                    target: target_id,
                    action_type: action.as_str().to_string(),
                })
            }
        };

        // Nodes run in order and stop at the first failure. Effects already
        // applied stay applied; in-fiction they have happened.
        let mut messages: Vec<String> = Vec::new();
        let mut success = true;
        for node in &nodes {
            let outcome = self.execute_node(node, player_id, &target_id, target_2)?;
            messages.extend(outcome.message);
            if !outcome.success {
                success = false;
                break;
            }
        }

        if success {
            match action {
                ActionType::Enter => {
                    let entered = self.label(&target_id);
                    self.move_player(player_id, &target_id)?;
                    messages.push(format!("You enter {}.", entered));
                }
                ActionType::Take => {
                    let current = self
                        .objects
                        .get(player_id)
                        .and_then(|player| player.parent.clone())
                        .ok_or_else(|| {
                            ActionError::InvariantViolation(format!(
                                "player '{}' has no current location",
                                player_id
                            ))
                        })?;
                    self.move_object(&target_id, &current, player_id)?;
                    messages.push(format!("You take {}.", self.label(&target_id)));
                }
                ActionType::Put => {
                    self.move_object(target_2, player_id, &target_id)?;
                    messages.push(format!(
                        "You put {} into {}.",
                        self.label(target_2),
                        self.label(&target_id)
                    ));
                }
                _ => {}
            }
        }

        Ok(ActionOutcome {
            success,
            message: if messages.is_empty() {
                None
            } else {
                Some(messages.join("\n"))
            },
        })
    }

    /// Run one node. Conditionals rebuild the context on every visit so a
    /// `set_gattr` applied by an earlier node in the same sequence is
    /// visible to later conditions.
    fn execute_node(
        &mut self,
        node: &ActionNode,
        player_id: &str,
        target_id: &str,
        target_2: &str,
    ) -> Result<ActionOutcome, ActionError> {
        match node {
            ActionNode::If { branch } => {
                let mut context = self.object_context(target_id);
                if !target_2.is_empty() {
                    context.insert("obj".to_string(), AttrValue::Str(target_2.to_string()));
                }
                if eval(&branch.exp, &context)? {
                    self.execute_node(&branch.then, player_id, target_id, target_2)
                } else if let Some(otherwise) = &branch.otherwise {
                    self.execute_node(otherwise, player_id, target_id, target_2)
                } else {
                    Ok(ActionOutcome::succeeded())
                }
            }
            ActionNode::Effect(effect) => self.apply_effect(effect, player_id),
        }
    }

    fn apply_effect(
        &mut self,
        effect: &EffectNode,
        player_id: &str,
    ) -> Result<ActionOutcome, ActionError> {
        if let Some(attrs) = &effect.set_gattr {
            for (key, value) in attrs {
                self.gattrs.insert(key.clone(), value.clone());
            }
        }
        if let Some(destination) = &effect.move_player_to {
            self.move_player(player_id, destination)?;
        }
        if let Some(destination) = &effect.move_all_players_to {
            for player in self.players.clone() {
                let already_there = self
                    .objects
                    .get(&player)
                    .and_then(|object| object.parent.as_deref())
                    == Some(destination.as_str());
                if !already_there {
                    self.move_player(&player, destination)?;
                }
            }
        }
        Ok(ActionOutcome {
            success: effect.success.unwrap_or(true),
            message: effect.message.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(
        name: &str,
        parent: Option<&str>,
        contents: &[&str],
        actions: &[(&str, &str)],
    ) -> GameObject {
        let mut table = HashMap::new();
        for (action_type, json) in actions {
            let nodes: Vec<ActionNode> =
                serde_json::from_str(&format!("[{}]", json)).expect("action nodes parse");
            table.insert(action_type.to_string(), nodes);
        }
        GameObject {
            name: name.to_string(),
            image: String::new(),
            parent: parent.map(|id| id.to_string()),
            contents: contents.iter().map(|id| id.to_string()).collect(),
            actions: table,
        }
    }

    /// hall > room1 > { p1, p2, key, room2, door }
    fn fixture() -> Quest {
        let mut objects = HashMap::new();
        objects.insert(
            "hall".to_string(),
            object("Great Hall", None, &["room1"], &[]),
        );
        objects.insert(
            "room1".to_string(),
            object(
                "First Room",
                Some("hall"),
                &["p1", "p2", "key", "room2", "door"],
                &[("put", "{}")],
            ),
        );
        objects.insert(
            "room2".to_string(),
            object(
                "Second Room",
                Some("room1"),
                &[],
                &[("enter", r#"{"message": "A draft greets you."}"#)],
            ),
        );
        objects.insert(
            "door".to_string(),
            object(
                "Oak Door",
                Some("room1"),
                &[],
                &[
                    (
                        "open",
                        r#"{"if": {"exp": {"eq": ["attr:door_open", true]},
                                   "do": {"message": "It swings open."},
                                   "else": {"message": "It is locked.", "success": false}}}"#,
                    ),
                    (
                        "unlock",
                        r#"{"set_gattr": {"door_open": true}}, {"message": "Click."}"#,
                    ),
                ],
            ),
        );
        objects.insert(
            "key".to_string(),
            object("Brass Key", Some("room1"), &[], &[("take", "{}")]),
        );
        objects.insert("p1".to_string(), object("", Some("room1"), &[], &[]));
        objects.insert("p2".to_string(), object("", Some("room1"), &[], &[]));

        let mut gattrs = HashMap::new();
        gattrs.insert("door_open".to_string(), AttrValue::Bool(false));

        Quest {
            title: "Fixture".to_string(),
            meta: AttrValue::Null,
            gattrs,
            objects,
            players: vec!["p1".to_string(), "p2".to_string()],
            end_actions: HashMap::new(),
        }
    }

    /// Every id referenced by any contents list appears in exactly one
    /// container, and each player's parent owns it.
    fn assert_containment_invariant(quest: &Quest) {
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for (container_id, container) in &quest.objects {
            for entry in &container.contents {
                let previous = seen.insert(entry.as_str(), container_id.as_str());
                assert!(
                    previous.is_none(),
                    "'{}' contained in both '{}' and '{}'",
                    entry,
                    previous.unwrap(),
                    container_id
                );
            }
        }
        for player in &quest.players {
            let parent = quest.objects[player].parent.as_deref().expect("parent set");
            assert_eq!(seen.get(player.as_str()), Some(&parent));
        }
    }

    #[test]
    fn move_round_trip_restores_graph() {
        let mut quest = fixture();
        let before = quest.objects.clone();
        quest.move_player("p1", "room2").expect("move in");
        assert_eq!(
            quest.objects["p1"].parent.as_deref(),
            Some("room2"),
            "parent follows move"
        );
        assert!(quest.objects["room2"].contains("p1"));
        assert!(!quest.objects["room1"].contains("p1"));
        assert_containment_invariant(&quest);
        quest.move_player("p1", "room1").expect("move back");
        assert_containment_invariant(&quest);
        // Same membership as before; p1 re-enters at the back of the list.
        let mut original: Vec<&String> = before["room1"].contents.iter().collect();
        let mut current: Vec<&String> = quest.objects["room1"].contents.iter().collect();
        original.sort();
        current.sort();
        assert_eq!(original, current);
        assert_eq!(quest.objects["p1"].parent, before["p1"].parent);
    }

    #[test]
    fn move_object_rejects_absent_source_member() {
        let mut quest = fixture();
        let result = quest.move_object("key", "room2", "p1");
        assert!(matches!(result, Err(ActionError::InvariantViolation(_))));
        assert!(quest.objects["room1"].contains("key"), "graph untouched");
    }

    #[test]
    fn move_object_rejects_unknown_destination_without_detaching() {
        let mut quest = fixture();
        let result = quest.move_object("key", "room1", "nowhere");
        assert!(matches!(result, Err(ActionError::InvariantViolation(_))));
        assert!(quest.objects["room1"].contains("key"));
    }

    #[test]
    fn object_context_merges_gattrs_over_fields() {
        let mut quest = fixture();
        quest
            .gattrs
            .insert("name".to_string(), AttrValue::from("shadowed"));
        let context = quest.object_context("room1");
        assert_eq!(context.get("name"), Some(&AttrValue::from("shadowed")));
        assert_eq!(context.get("parent"), Some(&AttrValue::from("hall")));
        assert_eq!(context.get("door_open"), Some(&AttrValue::Bool(false)));
    }

    #[test]
    fn unknown_player_is_reported() {
        let mut quest = fixture();
        let result = quest.perform_action("ghost", "view", "", "");
        assert!(matches!(result, Err(ActionError::UnknownPlayer { .. })));
    }

    #[test]
    fn unknown_target_is_reported() {
        let mut quest = fixture();
        let result = quest.perform_action("p1", "view", "chair", "");
        assert!(matches!(result, Err(ActionError::UnknownTarget { .. })));
    }

    #[test]
    fn out_of_reach_target_is_reported() {
        let mut quest = fixture();
        // The hall is room1's parent, not one of its contents.
        let result = quest.perform_action("p1", "view", "hall", "");
        assert!(matches!(result, Err(ActionError::Unreachable { .. })));
    }

    #[test]
    fn default_target_view_without_table_entry_is_unsupported() {
        let mut quest = fixture();
        let result = quest.perform_action("p1", "view", "", "");
        assert!(matches!(
            result,
            Err(ActionError::UnsupportedAction { ref target, .. }) if target == "room1"
        ));
    }

    #[test]
    fn take_then_put_restores_the_graph() {
        let mut quest = fixture();
        let before = quest.objects.clone();

        let taken = quest.perform_action("p1", "take", "key", "").expect("take");
        assert!(taken.success);
        assert!(quest.objects["p1"].contains("key"));
        assert!(!quest.objects["room1"].contains("key"));
        assert_containment_invariant(&quest);

        let put = quest
            .perform_action("p1", "put", "room1", "key")
            .expect("put");
        assert!(put.success);
        assert!(!quest.objects["p1"].contains("key"));
        assert!(quest.objects["room1"].contains("key"));
        assert_containment_invariant(&quest);

        let mut original: Vec<&String> = before["room1"].contents.iter().collect();
        let mut current: Vec<&String> = quest.objects["room1"].contents.iter().collect();
        original.sort();
        current.sort();
        assert_eq!(original, current);
    }

    #[test]
    fn put_without_holding_the_object_fails_and_leaves_graph_unchanged() {
        let mut quest = fixture();
        let before = quest.objects.clone();
        let result = quest.perform_action("p1", "put", "room1", "key");
        match result {
            Err(ActionError::PreconditionFailed { inventory, .. }) => {
                assert!(inventory.is_empty());
            }
            other => panic!("expected precondition failure, got {:?}", other),
        }
        assert_eq!(quest.objects, before);
    }

    #[test]
    fn enter_applies_table_then_moves_player() {
        let mut quest = fixture();
        let outcome = quest
            .perform_action("p1", "enter", "room2", "")
            .expect("enter");
        assert!(outcome.success);
        let message = outcome.message.expect("message");
        assert!(message.contains("A draft greets you."));
        assert!(message.contains("You enter Second Room."));
        assert_eq!(quest.objects["p1"].parent.as_deref(), Some("room2"));
        assert_containment_invariant(&quest);
    }

    #[test]
    fn enter_without_target_exits_to_the_outer_location() {
        let mut quest = fixture();
        quest.perform_action("p1", "enter", "room2", "").expect("enter");
        let outcome = quest.perform_action("p1", "enter", "", "").expect("exit");
        assert!(outcome.success);
        assert_eq!(
            outcome.message.as_deref(),
            Some("You leave Second Room.")
        );
        assert_eq!(quest.objects["p1"].parent.as_deref(), Some("room1"));
        assert_containment_invariant(&quest);
    }

    #[test]
    fn enter_without_target_at_root_falls_through_to_the_table() {
        let mut quest = fixture();
        quest.objects.get_mut("p1").unwrap().parent = Some("hall".to_string());
        let position = quest.objects["room1"]
            .contents
            .iter()
            .position(|entry| entry == "p1")
            .unwrap();
        quest.objects.get_mut("room1").unwrap().contents.remove(position);
        quest
            .objects
            .get_mut("hall")
            .unwrap()
            .contents
            .push("p1".to_string());
        // The hall is a root location with no `enter` entry.
        let result = quest.perform_action("p1", "enter", "", "");
        assert!(matches!(
            result,
            Err(ActionError::UnsupportedAction { .. })
        ));
    }

    #[test]
    fn conditional_else_branch_reports_failure() {
        let mut quest = fixture();
        let outcome = quest.perform_action("p1", "open", "door", "").expect("open");
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("It is locked."));
    }

    #[test]
    fn set_gattr_in_earlier_node_feeds_later_conditions() {
        let mut quest = fixture();
        let unlocked = quest
            .perform_action("p1", "unlock", "door", "")
            .expect("unlock");
        assert!(unlocked.success);
        assert_eq!(unlocked.message.as_deref(), Some("Click."));
        assert_eq!(quest.gattrs.get("door_open"), Some(&AttrValue::Bool(true)));

        let opened = quest.perform_action("p1", "open", "door", "").expect("open");
        assert!(opened.success);
        assert_eq!(opened.message.as_deref(), Some("It swings open."));
    }

    #[test]
    fn failed_node_stops_the_sequence_but_keeps_earlier_effects() {
        let mut quest = fixture();
        quest.objects.get_mut("door").unwrap().actions.insert(
            "push".to_string(),
            serde_json::from_str(
                r#"[{"set_gattr": {"pushed": true}, "success": false},
                    {"set_gattr": {"unreached": true}}]"#,
            )
            .expect("nodes parse"),
        );
        let outcome = quest.perform_action("p1", "push", "door", "").expect("push");
        assert!(!outcome.success);
        assert_eq!(quest.gattrs.get("pushed"), Some(&AttrValue::Bool(true)));
        assert_eq!(quest.gattrs.get("unreached"), None);
    }

    #[test]
    fn ch_all_pos_moves_every_player() {
        let mut quest = fixture();
        quest.objects.get_mut("room1").unwrap().actions.insert(
            "send".to_string(),
            serde_json::from_str(r#"[{"message": "The floor gives way!", "ch_all_pos": "room2"}]"#)
                .expect("nodes parse"),
        );
        let outcome = quest.perform_action("p1", "send", "", "").expect("send");
        assert!(outcome.success);
        assert_eq!(quest.objects["p1"].parent.as_deref(), Some("room2"));
        assert_eq!(quest.objects["p2"].parent.as_deref(), Some("room2"));
        assert_containment_invariant(&quest);
    }

    #[test]
    fn evaluation_errors_surface_as_action_errors() {
        let mut quest = fixture();
        quest.objects.get_mut("door").unwrap().actions.insert(
            "weigh".to_string(),
            serde_json::from_str(
                r#"[{"if": {"exp": {"lt": ["attr:objects", 1]}, "do": {}}}]"#,
            )
            .expect("nodes parse"),
        );
        let result = quest.perform_action("p1", "weigh", "door", "");
        assert!(matches!(result, Err(ActionError::Evaluation(_))));
    }

    #[test]
    fn secondary_target_is_visible_to_conditions_as_obj() {
        let mut quest = fixture();
        quest.objects.get_mut("room1").unwrap().actions.insert(
            "put".to_string(),
            serde_json::from_str(
                r#"[{"if": {"exp": {"eq": ["attr:obj", "key"]},
                            "do": {"message": "The key fits the alcove."},
                            "else": {"message": "That does not belong here.",
                                     "success": false}}}]"#,
            )
            .expect("nodes parse"),
        );
        quest.perform_action("p1", "take", "key", "").expect("take");
        let outcome = quest
            .perform_action("p1", "put", "room1", "key")
            .expect("put");
        assert!(outcome.success);
        assert!(outcome
            .message
            .expect("message")
            .contains("The key fits the alcove."));
    }
}
