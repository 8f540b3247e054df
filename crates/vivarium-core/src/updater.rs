//! Updater library: how an incoming delta is folded into a store key.
//!
//! An updater is a pure function
//! `(key, full_state, current, incoming) -> (new_value, extra_updates)`.
//! The extra map lets an updater touch keys other than the one it was
//! invoked for; the store merges it into its write buffer after assigning
//! the primary value.
//!
//! The built-in strategies are a closed enum so that a misspelt name fails
//! once, at wiring time, instead of at every application. Callers that
//! need something else supply [`Updater::Custom`].

use std::sync::Arc;

use vivarium_types::{State, Value, ValueError, merge_maps};

/// Errors raised while applying an updater.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpdateError {
    /// A built-in updater rejected its operands.
    #[error("updater `{updater}` failed on key `{key}`: {source}")]
    Value {
        /// The updater name.
        updater: &'static str,
        /// The key being updated.
        key: String,
        /// The underlying value error.
        source: ValueError,
    },

    /// A custom updater reported a failure.
    #[error("custom updater `{updater}` failed on key `{key}`: {message}")]
    Custom {
        /// The custom updater's name.
        updater: String,
        /// The key being updated.
        key: String,
        /// Description of the failure.
        message: String,
    },
}

/// Result of applying an updater to one key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateOutcome {
    /// The new value for the updated key.
    pub value: Value,
    /// Side-effect writes to other keys of the same store.
    pub extra: State,
}

impl UpdateOutcome {
    /// An outcome that only writes the updated key.
    pub const fn value(value: Value) -> Self {
        Self {
            value,
            extra: State::new(),
        }
    }
}

/// Signature of a caller-supplied updater.
pub type UpdaterFn =
    dyn Fn(&str, &State, &Value, &Value) -> Result<UpdateOutcome, UpdateError> + Send + Sync;

/// A strategy for folding incoming values into a store key.
#[derive(Clone, Default)]
pub enum Updater {
    /// `current + incoming`. Commutative, so batch order does not matter.
    #[default]
    Accumulate,
    /// `incoming` replaces `current`; the last write in batch order wins.
    Set,
    /// Recursive key-wise merge of two maps, incoming wins on leaves.
    Merge,
    /// A caller-supplied function.
    Custom {
        /// Name used in logs and error messages.
        name: String,
        /// The update function.
        apply: Arc<UpdaterFn>,
    },
}

impl Updater {
    /// Resolve a built-in updater by its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "accumulate" => Some(Self::Accumulate),
            "set" => Some(Self::Set),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }

    /// Wrap a closure as a custom updater.
    pub fn custom<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&str, &State, &Value, &Value) -> Result<UpdateOutcome, UpdateError>
            + Send
            + Sync
            + 'static,
    {
        Self::Custom {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// The updater's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Accumulate => "accumulate",
            Self::Set => "set",
            Self::Merge => "merge",
            Self::Custom { name, .. } => name,
        }
    }

    /// Whether applying a batch in any order yields the same result.
    pub const fn is_commutative(&self) -> bool {
        matches!(self, Self::Accumulate)
    }

    /// Apply this updater to `key`.
    ///
    /// `state` is the full write buffer of the store at the moment of
    /// application, `current` the key's present value.
    pub fn apply(
        &self,
        key: &str,
        state: &State,
        current: &Value,
        incoming: &Value,
    ) -> Result<UpdateOutcome, UpdateError> {
        match self {
            Self::Accumulate => current
                .checked_add(incoming)
                .map(UpdateOutcome::value)
                .map_err(|source| UpdateError::Value {
                    updater: "accumulate",
                    key: key.to_owned(),
                    source,
                }),
            Self::Set => Ok(UpdateOutcome::value(incoming.clone())),
            Self::Merge => merge(key, current, incoming),
            Self::Custom { apply, .. } => apply(key, state, current, incoming),
        }
    }
}

impl core::fmt::Debug for Updater {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Updater({})", self.name())
    }
}

fn merge(key: &str, current: &Value, incoming: &Value) -> Result<UpdateOutcome, UpdateError> {
    let mismatch = |actual: &Value| UpdateError::Value {
        updater: "merge",
        key: key.to_owned(),
        source: ValueError::TypeMismatch {
            expected: "map",
            actual: actual.type_name(),
        },
    };
    let Value::Map(update) = incoming else {
        return Err(mismatch(incoming));
    };
    match current {
        // A key declared without a default starts out as null or zero.
        Value::Null | Value::Int(0) => Ok(UpdateOutcome::value(incoming.clone())),
        Value::Map(base) => merge_maps(base, update)
            .map(|merged| UpdateOutcome::value(Value::Map(merged)))
            .map_err(|source| UpdateError::Value {
                updater: "merge",
                key: key.to_owned(),
                source,
            }),
        other => Err(mismatch(other)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn accumulate_adds() {
        let out = Updater::Accumulate
            .apply("n", &State::new(), &Value::Int(3), &Value::Int(-1))
            .unwrap();
        assert_eq!(out.value, Value::Int(2));
        assert!(out.extra.is_empty());
    }

    #[test]
    fn accumulate_rejects_strings() {
        let err = Updater::Accumulate
            .apply("n", &State::new(), &Value::Int(3), &Value::from("x"))
            .unwrap_err();
        assert!(matches!(err, UpdateError::Value { updater: "accumulate", .. }));
    }

    #[test]
    fn set_replaces() {
        let out = Updater::Set
            .apply("flag", &State::new(), &Value::Bool(false), &Value::Bool(true))
            .unwrap();
        assert_eq!(out.value, Value::Bool(true));
    }

    #[test]
    fn merge_combines_maps() {
        let current = map(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        let incoming = map(&[("b", Value::Int(5)), ("c", Value::Int(6))]);
        let out = Updater::Merge
            .apply("fields", &State::new(), &current, &incoming)
            .unwrap();
        assert_eq!(
            out.value,
            map(&[("a", Value::Int(1)), ("b", Value::Int(5)), ("c", Value::Int(6))])
        );
    }

    #[test]
    fn merge_into_undeclared_default_takes_incoming() {
        let incoming = map(&[("a", Value::Int(1))]);
        let out = Updater::Merge
            .apply("fields", &State::new(), &Value::Int(0), &incoming)
            .unwrap();
        assert_eq!(out.value, incoming);
    }

    #[test]
    fn merge_rejects_scalars() {
        let result = Updater::Merge.apply("fields", &State::new(), &Value::Int(4), &Value::Int(1));
        assert!(result.is_err());
    }

    #[test]
    fn custom_updater_can_write_extra_keys() {
        let updater = Updater::custom("track_max", |key, _state, current, incoming| {
            let value = current.checked_add(incoming).map_err(|e| UpdateError::Custom {
                updater: "track_max".to_owned(),
                key: key.to_owned(),
                message: e.to_string(),
            })?;
            let mut extra = State::new();
            extra.insert(format!("{key}_last"), incoming.clone());
            Ok(UpdateOutcome { value, extra })
        });
        let out = updater
            .apply("n", &State::new(), &Value::Int(1), &Value::Int(4))
            .unwrap();
        assert_eq!(out.value, Value::Int(5));
        assert_eq!(out.extra.get("n_last"), Some(&Value::Int(4)));
        assert_eq!(updater.name(), "track_max");
    }

    #[test]
    fn names_round_trip() {
        for name in ["accumulate", "set", "merge"] {
            assert_eq!(Updater::from_name(name).unwrap().name(), name);
        }
        assert!(Updater::from_name("sum").is_none());
    }

    fn fold(deltas: &[i64]) -> Value {
        deltas.iter().fold(Value::Int(0), |acc, d| {
            Updater::Accumulate
                .apply("k", &State::new(), &acc, &Value::Int(*d))
                .unwrap()
                .value
        })
    }

    proptest! {
        #[test]
        fn accumulate_is_order_independent_for_integers(
            deltas in proptest::collection::vec(-1_000_000_i64..1_000_000, 0..16)
        ) {
            let mut reversed = deltas.clone();
            reversed.reverse();
            let mut sorted = deltas.clone();
            sorted.sort_unstable();
            prop_assert_eq!(fold(&deltas), fold(&reversed));
            prop_assert_eq!(fold(&deltas), fold(&sorted));
        }

        #[test]
        fn accumulate_is_order_independent_for_floats(
            deltas in proptest::collection::vec(-1.0e3_f64..1.0e3, 1..16)
        ) {
            let sum = |items: &[f64]| {
                items.iter().fold(Value::Float(0.0), |acc, d| {
                    Updater::Accumulate
                        .apply("k", &State::new(), &acc, &Value::Float(*d))
                        .unwrap()
                        .value
                })
            };
            let mut reversed = deltas.clone();
            reversed.reverse();
            let forward = sum(&deltas).as_f64().unwrap();
            let backward = sum(&reversed).as_f64().unwrap();
            prop_assert!((forward - backward).abs() < 1e-9);
        }
    }
}
