use std::collections::HashMap;

use serde::Deserialize;

use crate::scripting::expr::Expr;
use crate::scripting::value::AttrValue;

/// One entry of an object's action table. A node is either a conditional
/// branch or a plain effect; an `if` key on a node supersedes any effect
/// keys written next to it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ActionNode {
    If {
        #[serde(rename = "if")]
        branch: Box<IfNode>,
    },
    Effect(EffectNode),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IfNode {
    pub exp: Expr,
    #[serde(rename = "do")]
    pub then: ActionNode,
    #[serde(rename = "else", default)]
    pub otherwise: Option<ActionNode>,
}

/// Declarative effects of a node. Every field is optional; an empty node is
/// valid and succeeds without doing anything (a missing `else` branch
/// executes as one). `ch_pos` relocates the acting player, `ch_all_pos`
/// every player. `success` defaults to true.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EffectNode {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub set_gattr: Option<HashMap<String, AttrValue>>,
    #[serde(default, rename = "ch_pos")]
    pub move_player_to: Option<String>,
    #[serde(default, rename = "ch_all_pos")]
    pub move_all_players_to: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

/// Normalized result of running a node or a node sequence: one success flag,
/// an optional accumulated message.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded() -> Self {
        ActionOutcome {
            success: true,
            message: None,
        }
    }
}
