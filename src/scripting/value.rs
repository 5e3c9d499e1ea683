use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A script-supplied value: global attributes, expression operands and the
/// opaque `meta`/`end_actions` blocks all carry these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl Default for AttrValue {
    fn default() -> Self {
        AttrValue::Null
    }
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Int(value) => Some(*value as f64),
            AttrValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Ordering is defined for number/number and string/string pairs only.
    pub fn compare(&self, other: &AttrValue) -> Option<Ordering> {
        if let (Some(left), Some(right)) = (self.as_number(), other.as_number()) {
            return left.partial_cmp(&right);
        }
        match (self, other) {
            (AttrValue::Str(left), AttrValue::Str(right)) => Some(left.cmp(right)),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
            AttrValue::List(_) => "list",
            AttrValue::Map(_) => "map",
        }
    }
}

impl PartialEq for AttrValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttrValue::Null, AttrValue::Null) => true,
            (AttrValue::Bool(left), AttrValue::Bool(right)) => left == right,
            (AttrValue::Str(left), AttrValue::Str(right)) => left == right,
            (AttrValue::List(left), AttrValue::List(right)) => left == right,
            (AttrValue::Map(left), AttrValue::Map(right)) => left == right,
            (left, right) => match (left.as_number(), right.as_number()) {
                (Some(left), Some(right)) => left == right,
                _ => false,
            },
        }
    }
}

impl std::fmt::Display for AttrValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrValue::Null => write!(f, "null"),
            AttrValue::Bool(value) => write!(f, "{}", value),
            AttrValue::Int(value) => write!(f, "{}", value),
            AttrValue::Float(value) => write!(f, "{}", value),
            AttrValue::Str(value) => write!(f, "{}", value),
            AttrValue::List(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            AttrValue::Map(entries) => {
                write!(f, "{{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert_eq!(AttrValue::Int(3), AttrValue::Float(3.0));
        assert_eq!(
            AttrValue::Int(2).compare(&AttrValue::Float(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn strings_order_lexicographically() {
        assert_eq!(
            AttrValue::from("abc").compare(&AttrValue::from("abd")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn mixed_types_have_no_ordering() {
        assert_eq!(AttrValue::from("abc").compare(&AttrValue::Int(1)), None);
        assert_eq!(
            AttrValue::List(Vec::new()).compare(&AttrValue::List(Vec::new())),
            None
        );
    }

    #[test]
    fn untagged_deserialization_covers_scalars_and_lists() {
        let value: AttrValue = serde_json::from_str("[1, \"two\", null, true]").expect("parse");
        assert_eq!(
            value,
            AttrValue::List(vec![
                AttrValue::Int(1),
                AttrValue::from("two"),
                AttrValue::Null,
                AttrValue::Bool(true),
            ])
        );
    }
}
