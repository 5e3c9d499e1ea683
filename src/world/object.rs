use std::collections::HashMap;

use crate::scripting::action::ActionNode;

/// A node of the containment tree. `contents` order is insertion order and
/// doubles as display order. `parent` is kept in sync with the containing
/// object's `contents` by the move primitives on `Quest`; nothing else may
/// touch either side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameObject {
    pub name: String,
    pub image: String,
    pub parent: Option<String>,
    pub contents: Vec<String>,
    pub actions: HashMap<String, Vec<ActionNode>>,
}

impl GameObject {
    pub fn contains(&self, id: &str) -> bool {
        self.contents.iter().any(|entry| entry == id)
    }

    /// Display name: the script's `name` when set, the id otherwise.
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        if self.name.is_empty() {
            id
        } else {
            &self.name
        }
    }
}
