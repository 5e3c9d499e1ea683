use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::scripting::action::ActionNode;
use crate::scripting::value::AttrValue;
use crate::world::object::GameObject;
use crate::world::quest::Quest;

/// Raw script file as written by quest authors. `objects` values carry the
/// original field names (`objects` for contents, `on_action` for the action
/// table); extra keys are ignored.
#[derive(Debug, Deserialize)]
struct ScriptFile {
    title: String,
    #[serde(default)]
    meta: AttrValue,
    #[serde(default)]
    gattrs: HashMap<String, AttrValue>,
    objects: HashMap<String, ScriptObject>,
    players: Vec<String>,
    #[serde(default)]
    end_actions: HashMap<String, AttrValue>,
}

#[derive(Debug, Deserialize)]
struct ScriptObject {
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    objects: Vec<String>,
    #[serde(default)]
    on_action: HashMap<String, NodeList>,
    #[serde(default)]
    parent: Option<String>,
}

/// Action-table entries may be a single node or an ordered list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeList {
    One(ActionNode),
    Many(Vec<ActionNode>),
}

impl NodeList {
    fn into_vec(self) -> Vec<ActionNode> {
        match self {
            NodeList::One(node) => vec![node],
            NodeList::Many(nodes) => nodes,
        }
    }
}

/// Load a quest script from disk. `.yaml`/`.yml` files parse as YAML,
/// everything else as JSON. Any parse or validation failure is fatal to
/// startup; nothing is served from a script that fails here.
pub fn load_script(path: &Path) -> Result<Quest, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read script {}: {}", path.display(), err))?;
    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    let parsed = if is_yaml {
        parse_script_yaml(&content)
    } else {
        parse_script_json(&content)
    };
    parsed.map_err(|err| format!("script {}: {}", path.display(), err))
}

pub fn parse_script_json(content: &str) -> Result<Quest, String> {
    let script: ScriptFile =
        serde_json::from_str(content).map_err(|err| format!("invalid script: {}", err))?;
    build_quest(script)
}

pub fn parse_script_yaml(content: &str) -> Result<Quest, String> {
    let script: ScriptFile =
        serde_yaml::from_str(content).map_err(|err| format!("invalid script: {}", err))?;
    build_quest(script)
}

fn build_quest(script: ScriptFile) -> Result<Quest, String> {
    let mut objects = HashMap::new();
    for (id, raw) in script.objects {
        let actions = raw
            .on_action
            .into_iter()
            .map(|(action_type, nodes)| (action_type, nodes.into_vec()))
            .collect();
        objects.insert(
            id,
            GameObject {
                name: raw.name,
                image: raw.image,
                parent: raw.parent,
                contents: raw.objects,
                actions,
            },
        );
    }

    let quest = Quest {
        title: script.title,
        meta: script.meta,
        gattrs: script.gattrs,
        objects,
        players: script.players,
        end_actions: script.end_actions,
    };
    validate(&quest)?;
    Ok(quest)
}

/// Structural validation, all fatal: players must exist and sit inside
/// their declared parent, every contained id must exist, and no id may be
/// contained twice (the single-parent rule).
fn validate(quest: &Quest) -> Result<(), String> {
    for player in &quest.players {
        let object = quest
            .objects
            .get(player)
            .ok_or_else(|| format!("player '{}' has no object", player))?;
        let parent_id = object
            .parent
            .as_ref()
            .ok_or_else(|| format!("player '{}' has no parent location", player))?;
        let parent = quest
            .objects
            .get(parent_id)
            .ok_or_else(|| format!("player '{}' parent '{}' does not exist", player, parent_id))?;
        if !parent.contains(player) {
            return Err(format!(
                "player '{}' is not inside its parent '{}'",
                player, parent_id
            ));
        }
    }

    let mut contained: HashSet<&str> = HashSet::new();
    for (container_id, container) in &quest.objects {
        for entry in &container.contents {
            if !quest.objects.contains_key(entry) {
                return Err(format!(
                    "'{}' contains unknown object '{}'",
                    container_id, entry
                ));
            }
            if !contained.insert(entry.as_str()) {
                return Err(format!("'{}' is contained more than once", entry));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripting::value::AttrValue;

    const DEMO: &str = r#"{
        "title": "Cellar",
        "meta": {"author": "n"},
        "gattrs": {"lamp_lit": false},
        "objects": {
            "cellar": {"name": "Cellar", "objects": ["p1", "lamp"],
                       "on_action": {"view": {"message": "Dark down here."}}},
            "lamp": {"name": "Lamp", "parent": "cellar",
                     "on_action": {"take": [{"message": "You grab the lamp."}]}},
            "p1": {"parent": "cellar"}
        },
        "players": ["p1"]
    }"#;

    #[test]
    fn json_script_round_trips_into_a_quest() {
        let quest = parse_script_json(DEMO).expect("script loads");
        assert_eq!(quest.title, "Cellar");
        assert_eq!(quest.gattrs.get("lamp_lit"), Some(&AttrValue::Bool(false)));
        assert_eq!(quest.objects["cellar"].contents, vec!["p1", "lamp"]);
        // Single nodes and node lists both normalize to vectors.
        assert_eq!(quest.objects["cellar"].actions["view"].len(), 1);
        assert_eq!(quest.objects["lamp"].actions["take"].len(), 1);
    }

    #[test]
    fn yaml_script_parses_too() {
        let quest = parse_script_yaml(
            r#"
title: Shed
gattrs:
  open: false
objects:
  shed:
    name: Shed
    objects: [p1]
    on_action:
      view:
        message: Cobwebs everywhere.
  p1:
    parent: shed
players: [p1]
"#,
        )
        .expect("yaml loads");
        assert_eq!(quest.title, "Shed");
        assert!(quest.objects["shed"].actions.contains_key("view"));
    }

    #[test]
    fn player_without_object_is_fatal() {
        let err = parse_script_json(
            r#"{"title": "x", "objects": {
                    "room": {"objects": []}
                }, "players": ["p1"]}"#,
        )
        .expect_err("must fail");
        assert!(err.contains("p1"), "unexpected error: {}", err);
    }

    #[test]
    fn player_missing_from_parent_contents_is_fatal() {
        let err = parse_script_json(
            r#"{"title": "x", "objects": {
                    "room": {"objects": []},
                    "p1": {"parent": "room"}
                }, "players": ["p1"]}"#,
        )
        .expect_err("must fail");
        assert!(err.contains("not inside"), "unexpected error: {}", err);
    }

    #[test]
    fn doubly_contained_object_is_fatal() {
        let err = parse_script_json(
            r#"{"title": "x", "objects": {
                    "a": {"objects": ["coin"]},
                    "b": {"objects": ["coin"]},
                    "coin": {}
                }, "players": []}"#,
        )
        .expect_err("must fail");
        assert!(err.contains("coin"), "unexpected error: {}", err);
    }

    #[test]
    fn unknown_contained_id_is_fatal() {
        let err = parse_script_json(
            r#"{"title": "x", "objects": {
                    "a": {"objects": ["ghost"]}
                }, "players": []}"#,
        )
        .expect_err("must fail");
        assert!(err.contains("ghost"), "unexpected error: {}", err);
    }

    #[test]
    fn malformed_action_node_is_a_parse_error() {
        let err = parse_script_json(
            r#"{"title": "x", "objects": {
                    "room": {"objects": [], "on_action": {"view": {"warp": "elsewhere"}}}
                }, "players": []}"#,
        )
        .expect_err("must fail");
        assert!(err.contains("invalid script"), "unexpected error: {}", err);
    }
}
