use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Deserialize;

use crate::scripting::value::AttrValue;

/// Flat key/value mapping a condition tree is evaluated against: the target
/// object's fields merged with the global attributes, plus `obj` when the
/// request carries a secondary target.
pub type Context = HashMap<String, AttrValue>;

/// String operands with this prefix are context lookups, not literals.
pub const ATTR_PREFIX: &str = "attr:";

/// Boolean condition tree. The wire shape is externally tagged, matching the
/// script format: `{"eq": [a, b]}`, `{"and": [...]}`, `{"not": {...}}`.
/// Unknown operator keys are rejected when the script is parsed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expr {
    Eq(AttrValue, AttrValue),
    Ne(AttrValue, AttrValue),
    Le(AttrValue, AttrValue),
    Lt(AttrValue, AttrValue),
    Ge(AttrValue, AttrValue),
    Gt(AttrValue, AttrValue),
    In(AttrValue, AttrValue),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// An ordering comparison over a pair with no defined order.
    Unordered { left: AttrValue, right: AttrValue },
    /// An `in` test over operands that support no membership check.
    Membership { container: AttrValue, value: AttrValue },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Unordered { left, right } => write!(
                f,
                "cannot order {} against {}",
                left.type_name(),
                right.type_name()
            ),
            EvalError::Membership { container, value } => write!(
                f,
                "cannot test {} membership in {}",
                value.type_name(),
                container.type_name()
            ),
        }
    }
}

impl std::error::Error for EvalError {}

/// Resolve an operand leaf: `attr:<key>` strings are looked up in the
/// context (missing keys yield null, the absent marker), everything else is
/// the literal itself.
fn resolve(operand: &AttrValue, context: &Context) -> AttrValue {
    if let AttrValue::Str(text) = operand {
        if let Some(key) = text.strip_prefix(ATTR_PREFIX) {
            return context.get(key.trim()).cloned().unwrap_or(AttrValue::Null);
        }
    }
    operand.clone()
}

fn ordered(
    left: &AttrValue,
    right: &AttrValue,
    context: &Context,
) -> Result<Ordering, EvalError> {
    let left = resolve(left, context);
    let right = resolve(right, context);
    left.compare(&right)
        .ok_or(EvalError::Unordered { left, right })
}

/// Evaluate a condition tree against a context. `and`/`or` short-circuit:
/// once the result is determined, later sub-expressions are not evaluated.
pub fn eval(expr: &Expr, context: &Context) -> Result<bool, EvalError> {
    match expr {
        Expr::Eq(left, right) => Ok(resolve(left, context) == resolve(right, context)),
        Expr::Ne(left, right) => Ok(resolve(left, context) != resolve(right, context)),
        Expr::Le(left, right) => Ok(ordered(left, right, context)? != Ordering::Greater),
        Expr::Lt(left, right) => Ok(ordered(left, right, context)? == Ordering::Less),
        Expr::Ge(left, right) => Ok(ordered(left, right, context)? != Ordering::Less),
        Expr::Gt(left, right) => Ok(ordered(left, right, context)? == Ordering::Greater),
        Expr::In(container, value) => {
            let container = resolve(container, context);
            let value = resolve(value, context);
            match (&container, &value) {
                (AttrValue::List(items), _) => Ok(items.iter().any(|item| *item == value)),
                (AttrValue::Str(text), AttrValue::Str(needle)) => Ok(text.contains(needle)),
                _ => Err(EvalError::Membership { container, value }),
            }
        }
        Expr::And(parts) => {
            for part in parts {
                if !eval(part, context)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Or(parts) => {
            for part in parts {
                if eval(part, context)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Not(inner) => Ok(!eval(inner, context)?),
    }
}
