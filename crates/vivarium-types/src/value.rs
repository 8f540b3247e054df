//! The recursive state value type.
//!
//! Every key in every store holds a [`Value`]. The shape mirrors JSON, with
//! one deliberate difference: integers and floats are distinct variants,
//! because division halves them differently (integers split with a coin
//! flip for the remainder, floats split exactly).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A flat map of state keys to values, the contents of one store.
pub type State = BTreeMap<String, Value>;

/// Maximum nesting depth accepted by the recursive merge functions.
pub const MAX_MERGE_DEPTH: usize = 64;

/// Errors raised by value arithmetic and merging.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// An operation was applied to a value of the wrong kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The kind of value the operation requires.
        expected: &'static str,
        /// The kind of value that was supplied.
        actual: &'static str,
    },

    /// Integer addition overflowed `i64`.
    #[error("integer overflow adding {left} and {right}")]
    Overflow {
        /// Left operand.
        left: i64,
        /// Right operand.
        right: i64,
    },

    /// A merge recursed past [`MAX_MERGE_DEPTH`].
    #[error("merge exceeded maximum depth of {MAX_MERGE_DEPTH}")]
    DepthExceeded,
}

/// A JSON-like state value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// A boolean flag.
    Bool(bool),
    /// A signed integer count.
    Int(i64),
    /// A floating-point quantity.
    Float(f64),
    /// A string.
    String(String),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A nested map of values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Name of this value's kind, for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Numeric view of the value. Integers widen to `f64`.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Integer view of the value. Floats are not coerced.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Map view of the value.
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether the value counts as "set" for flag-style checks.
    ///
    /// Null, `false`, zero, and empty strings, lists, or maps are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::Map(m) => !m.is_empty(),
        }
    }

    /// Numeric sum of two values.
    ///
    /// Two integers stay integral (with overflow checking); any float
    /// operand promotes the result to a float.
    pub fn checked_add(&self, other: &Self) -> Result<Self, ValueError> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(*b)
                .map(Self::Int)
                .ok_or(ValueError::Overflow { left: *a, right: *b }),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                match (self.as_f64(), other.as_f64()) {
                    (Some(a), Some(b)) => Ok(Self::Float(a + b)),
                    _ => Err(ValueError::TypeMismatch {
                        expected: "number",
                        actual: other.type_name(),
                    }),
                }
            }
            (Self::Int(_) | Self::Float(_), _) => Err(ValueError::TypeMismatch {
                expected: "number",
                actual: other.type_name(),
            }),
            _ => Err(ValueError::TypeMismatch {
                expected: "number",
                actual: self.type_name(),
            }),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<State> for Value {
    fn from(m: State) -> Self {
        Self::Map(m)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Recursively merge `incoming` over `base`.
///
/// Nested maps are merged key by key; on any other collision the incoming
/// value replaces the base value.
pub fn merge_maps(base: &State, incoming: &State) -> Result<State, ValueError> {
    merge_at_depth(base, incoming, 0)
}

fn merge_at_depth(base: &State, incoming: &State, depth: usize) -> Result<State, ValueError> {
    if depth >= MAX_MERGE_DEPTH {
        return Err(ValueError::DepthExceeded);
    }
    let mut merged = base.clone();
    for (key, value) in incoming {
        let next = match (merged.get(key), value) {
            (Some(Value::Map(existing)), Value::Map(update)) => {
                Value::Map(merge_at_depth(existing, update, depth.saturating_add(1))?)
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    Ok(merged)
}

/// Fill the gaps in `target` with entries from `defaults`.
///
/// Keys already present in `target` are kept; nested maps are filled
/// recursively. Returns the dotted paths of leaves where both sides held
/// different values, so callers can decide whether a conflict matters.
pub fn fill_gaps(target: &mut State, defaults: &State) -> Result<Vec<String>, ValueError> {
    let mut conflicts = Vec::new();
    fill_at_depth(target, defaults, "", 0, &mut conflicts)?;
    Ok(conflicts)
}

fn fill_at_depth(
    target: &mut State,
    defaults: &State,
    prefix: &str,
    depth: usize,
    conflicts: &mut Vec<String>,
) -> Result<(), ValueError> {
    if depth >= MAX_MERGE_DEPTH {
        return Err(ValueError::DepthExceeded);
    }
    for (key, default) in defaults {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), default.clone());
            }
            Some(Value::Map(existing)) => {
                if let Value::Map(nested) = default {
                    fill_at_depth(existing, nested, &path, depth.saturating_add(1), conflicts)?;
                } else {
                    conflicts.push(path);
                }
            }
            Some(existing) => {
                if existing != default {
                    conflicts.push(path);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn state(pairs: &[(&str, Value)]) -> State {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn integer_addition_stays_integral() {
        let sum = Value::Int(2).checked_add(&Value::Int(3)).unwrap();
        assert_eq!(sum, Value::Int(5));
    }

    #[test]
    fn mixed_addition_promotes_to_float() {
        let sum = Value::Int(2).checked_add(&Value::Float(0.5)).unwrap();
        assert_eq!(sum, Value::Float(2.5));
    }

    #[test]
    fn addition_overflow_is_reported() {
        let result = Value::Int(i64::MAX).checked_add(&Value::Int(1));
        assert!(matches!(result, Err(ValueError::Overflow { .. })));
    }

    #[test]
    fn adding_a_string_is_a_type_mismatch() {
        let result = Value::Int(1).checked_add(&Value::from("x"));
        assert_eq!(
            result,
            Err(ValueError::TypeMismatch {
                expected: "number",
                actual: "string"
            })
        );
    }

    #[test]
    fn merge_prefers_incoming_leaves() {
        let base = state(&[
            ("a", Value::Int(1)),
            ("nested", Value::Map(state(&[("x", Value::Int(1)), ("y", Value::Int(2))]))),
        ]);
        let incoming = state(&[("nested", Value::Map(state(&[("y", Value::Int(9))])))]);
        let merged = merge_maps(&base, &incoming).unwrap();
        let nested = merged.get("nested").and_then(Value::as_map).unwrap();
        assert_eq!(nested.get("x"), Some(&Value::Int(1)));
        assert_eq!(nested.get("y"), Some(&Value::Int(9)));
        assert_eq!(merged.get("a"), Some(&Value::Int(1)));
    }

    #[test]
    fn fill_gaps_keeps_existing_and_reports_conflicts() {
        let mut target = state(&[("mass", Value::Float(1.0))]);
        let defaults = state(&[("mass", Value::Float(2.0)), ("volume", Value::Float(3.0))]);
        let conflicts = fill_gaps(&mut target, &defaults).unwrap();
        assert_eq!(target.get("mass"), Some(&Value::Float(1.0)));
        assert_eq!(target.get("volume"), Some(&Value::Float(3.0)));
        assert_eq!(conflicts, vec!["mass".to_owned()]);
    }

    #[test]
    fn deep_merge_is_depth_bounded() {
        let mut deep = Value::Int(0);
        for _ in 0..=MAX_MERGE_DEPTH {
            deep = Value::Map(state(&[("k", deep)]));
        }
        let tree = state(&[("k", deep)]);
        assert_eq!(merge_maps(&tree, &tree), Err(ValueError::DepthExceeded));
    }

    #[test]
    fn values_deserialize_from_plain_json() {
        let parsed: State =
            serde_json::from_str(r#"{"n": 3, "x": 1.5, "flag": true, "none": null}"#).unwrap();
        assert_eq!(parsed.get("n"), Some(&Value::Int(3)));
        assert_eq!(parsed.get("x"), Some(&Value::Float(1.5)));
        assert_eq!(parsed.get("flag"), Some(&Value::Bool(true)));
        assert_eq!(parsed.get("none"), Some(&Value::Null));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Float(0.5).is_truthy());
    }
}
