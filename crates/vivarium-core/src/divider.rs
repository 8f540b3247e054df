//! Divider library: how a store value is split between two daughters.
//!
//! Every divider maps one parent value to exactly two daughter values.
//! `split` conserves numeric quantities (integers up to a coin flip for
//! the odd unit); `set` and `zero` deliberately do not.

use std::sync::Arc;

use rand::{Rng, RngCore};
use vivarium_types::Value;

/// Sentinel string treated like floating-point infinity by `split`.
pub const INFINITY_SENTINEL: &str = "Infinity";

/// Errors raised while dividing a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DivideError {
    /// The divider cannot split a value of this kind.
    #[error("divider `{divider}` cannot split a {actual} value")]
    Unsupported {
        /// The divider name.
        divider: &'static str,
        /// Kind of the offending value.
        actual: &'static str,
    },

    /// A custom divider reported a failure.
    #[error("custom divider `{divider}` failed: {message}")]
    Custom {
        /// The custom divider's name.
        divider: String,
        /// Description of the failure.
        message: String,
    },
}

/// Signature of a caller-supplied divider.
pub type DividerFn = dyn Fn(&Value, &mut dyn RngCore) -> Result<[Value; 2], DivideError> + Send + Sync;

/// A strategy for splitting a value at division.
#[derive(Clone, Default)]
pub enum Divider {
    /// Halve numbers; integers give the odd unit to a random daughter.
    #[default]
    Split,
    /// Split a map's entries in two by key order.
    SplitDict,
    /// Both daughters inherit the value unchanged.
    Set,
    /// Both daughters start from zero.
    Zero,
    /// A caller-supplied function.
    Custom {
        /// Name used in logs and error messages.
        name: String,
        /// The divide function.
        divide: Arc<DividerFn>,
    },
}

impl Divider {
    /// Resolve a built-in divider by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "split" => Some(Self::Split),
            "split_dict" => Some(Self::SplitDict),
            "set" => Some(Self::Set),
            "zero" => Some(Self::Zero),
            _ => None,
        }
    }

    /// Wrap a closure as a custom divider.
    pub fn custom<F>(name: impl Into<String>, divide: F) -> Self
    where
        F: Fn(&Value, &mut dyn RngCore) -> Result<[Value; 2], DivideError> + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            divide: Arc::new(divide),
        }
    }

    /// The divider's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Split => "split",
            Self::SplitDict => "split_dict",
            Self::Set => "set",
            Self::Zero => "zero",
            Self::Custom { name, .. } => name,
        }
    }

    /// Split `value` into two daughter values.
    pub fn divide(&self, value: &Value, rng: &mut dyn RngCore) -> Result<[Value; 2], DivideError> {
        match self {
            Self::Split => split(value, rng),
            Self::SplitDict => split_dict(value),
            Self::Set => Ok([value.clone(), value.clone()]),
            Self::Zero => Ok([Value::Int(0), Value::Int(0)]),
            Self::Custom { divide, .. } => divide(value, rng),
        }
    }
}

impl core::fmt::Debug for Divider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Divider({})", self.name())
    }
}

/// Halve a numeric value.
///
/// Integers give `floor(n / 2)` to both daughters and the remainder to one
/// daughter picked by a coin flip, so `a + b == n` always holds. Floats
/// halve exactly. Infinite quantities (and the `"Infinity"` sentinel) are
/// copied to both daughters.
pub fn split(value: &Value, rng: &mut dyn RngCore) -> Result<[Value; 2], DivideError> {
    match value {
        Value::Int(n) => {
            let half = n.div_euclid(2);
            let remainder = n.rem_euclid(2);
            let bigger = half.saturating_add(remainder);
            if rng.random_bool(0.5) {
                Ok([Value::Int(bigger), Value::Int(half)])
            } else {
                Ok([Value::Int(half), Value::Int(bigger)])
            }
        }
        Value::Float(x) if x.is_infinite() => Ok([value.clone(), value.clone()]),
        Value::Float(x) => Ok([Value::Float(x / 2.0), Value::Float(x / 2.0)]),
        Value::String(s) if s == INFINITY_SENTINEL => Ok([value.clone(), value.clone()]),
        other => Err(DivideError::Unsupported {
            divider: "split",
            actual: other.type_name(),
        }),
    }
}

/// Split a map's entries in two by key order.
///
/// The first daughter receives the entries from index `len / 2` onwards,
/// the second daughter the entries before it.
pub fn split_dict(value: &Value) -> Result<[Value; 2], DivideError> {
    let Value::Map(entries) = value else {
        return Err(DivideError::Unsupported {
            divider: "split_dict",
            actual: value.type_name(),
        });
    };
    let cut = entries.len() / 2;
    let mut first = entries.clone();
    let second = first.split_off(
        entries
            .keys()
            .nth(cut)
            .map_or("", String::as_str),
    );
    // `split_off` keeps keys below the cut in `first`; daughters take them
    // the other way round.
    Ok([Value::Map(second), Value::Map(first)])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn split_halves_floats_exactly() {
        let [a, b] = split(&Value::Float(3.0), &mut rng()).unwrap();
        assert_eq!(a, Value::Float(1.5));
        assert_eq!(b, Value::Float(1.5));
    }

    #[test]
    fn split_keeps_infinity() {
        let [a, b] = split(&Value::Float(f64::INFINITY), &mut rng()).unwrap();
        assert_eq!(a, Value::Float(f64::INFINITY));
        assert_eq!(b, Value::Float(f64::INFINITY));

        let sentinel = Value::from(INFINITY_SENTINEL);
        let [a, b] = split(&sentinel, &mut rng()).unwrap();
        assert_eq!(a, sentinel);
        assert_eq!(b, sentinel);
    }

    #[test]
    fn split_rejects_other_strings() {
        let result = split(&Value::from("many"), &mut rng());
        assert!(matches!(result, Err(DivideError::Unsupported { .. })));
    }

    #[test]
    fn odd_remainder_goes_to_both_sides_over_many_flips() {
        let mut rng = rng();
        let mut first_bigger = 0_u32;
        for _ in 0..200 {
            let [a, _] = split(&Value::Int(5), &mut rng).unwrap();
            if a == Value::Int(3) {
                first_bigger = first_bigger.saturating_add(1);
            }
        }
        assert!(first_bigger > 0 && first_bigger < 200);
    }

    #[test]
    fn split_dict_divides_by_key_order() {
        let entries: BTreeMap<String, Value> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|k| ((*k).to_owned(), Value::Int(1)))
            .collect();
        let [first, second] = split_dict(&Value::Map(entries)).unwrap();
        let first: Vec<_> = first.as_map().unwrap().keys().cloned().collect();
        let second: Vec<_> = second.as_map().unwrap().keys().cloned().collect();
        assert_eq!(first, vec!["c", "d", "e"]);
        assert_eq!(second, vec!["a", "b"]);
    }

    #[test]
    fn split_dict_of_empty_map() {
        let [a, b] = split_dict(&Value::Map(BTreeMap::new())).unwrap();
        assert_eq!(a, Value::Map(BTreeMap::new()));
        assert_eq!(b, Value::Map(BTreeMap::new()));
    }

    #[test]
    fn set_and_zero() {
        let [a, b] = Divider::Set.divide(&Value::Bool(true), &mut rng()).unwrap();
        assert_eq!((a, b), (Value::Bool(true), Value::Bool(true)));
        let [a, b] = Divider::Zero.divide(&Value::Float(9.0), &mut rng()).unwrap();
        assert_eq!((a, b), (Value::Int(0), Value::Int(0)));
    }

    #[test]
    fn names_round_trip() {
        for name in ["split", "split_dict", "set", "zero"] {
            assert_eq!(Divider::from_name(name).unwrap().name(), name);
        }
        assert!(Divider::from_name("halve").is_none());
    }

    proptest! {
        #[test]
        fn integer_split_conserves(n in 0_i64..1_000_000_000, seed in any::<u64>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let [a, b] = split(&Value::Int(n), &mut rng).unwrap();
            let (a, b) = (a.as_i64().unwrap(), b.as_i64().unwrap());
            prop_assert_eq!(a + b, n);
            prop_assert!((a - b).abs() <= 1);
        }

        #[test]
        fn float_split_is_exact_half(x in -1.0e12_f64..1.0e12) {
            let [a, b] = split(&Value::Float(x), &mut rng()).unwrap();
            prop_assert_eq!(a, Value::Float(x / 2.0));
            prop_assert_eq!(b, Value::Float(x / 2.0));
        }
    }
}
