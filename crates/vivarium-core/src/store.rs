//! Schema-aware, double-buffered state containers.
//!
//! A [`Store`] owns the committed state of one named slice of a
//! compartment. Updates never touch the committed state directly: the
//! compartment opens a write buffer with [`Store::prepare`], folds every
//! update of a batch into it with [`Store::apply_updates`], and only then
//! swaps it in with [`Store::proceed`]. Readers always see the committed
//! state, so nothing can observe a half-applied batch. A failed batch is
//! thrown away with [`Store::abort`].

use rand::RngCore;
use tracing::trace;
use vivarium_types::{ProcessId, State, StoreId, Value};

use crate::divider::{DivideError, Divider};
use crate::schema::{Schema, SchemaEntry};
use crate::updater::{UpdateError, Updater};

/// Entry used for keys without an explicit schema.
static DEFAULT_ENTRY: SchemaEntry = SchemaEntry {
    updater: Updater::Accumulate,
    divider: Divider::Split,
};

/// Errors raised by store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// An update referenced a key the store never declared.
    #[error("process `{process}` updated undeclared key `{key}` in store `{store}`")]
    MissingKey {
        /// The store being updated.
        store: StoreId,
        /// The undeclared key.
        key: String,
        /// The process whose update referenced it.
        process: ProcessId,
    },

    /// An update was applied without an open write buffer.
    #[error("store `{store}` received an update outside prepare/proceed")]
    NotPrepared {
        /// The store.
        store: StoreId,
    },

    /// A write buffer was opened twice.
    #[error("store `{store}` is already prepared")]
    AlreadyPrepared {
        /// The store.
        store: StoreId,
    },

    /// The key's updater failed.
    #[error("process `{process}` failed to update store `{store}`: {source}")]
    Update {
        /// The store being updated.
        store: StoreId,
        /// The process whose update failed.
        process: ProcessId,
        /// The underlying updater error.
        source: UpdateError,
    },

    /// The key's divider failed.
    #[error("failed to divide key `{key}` of store `{store}`: {source}")]
    Divide {
        /// The store being divided.
        store: StoreId,
        /// The key being divided.
        key: String,
        /// The underlying divider error.
        source: DivideError,
    },
}

/// A named container of state with per-key update and divide rules.
#[derive(Debug, Clone)]
pub struct Store {
    id: StoreId,
    state: State,
    new_state: Option<State>,
    schema: Schema,
}

impl Store {
    /// Create a store with initial state and an empty schema.
    pub const fn new(id: StoreId, state: State) -> Self {
        Self {
            id,
            state,
            new_state: None,
            schema: Schema::new(),
        }
    }

    /// The store's name.
    pub const fn id(&self) -> &StoreId {
        &self.id
    }

    /// Ensure every key exists, inserting `0` for absent ones.
    pub fn declare<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            let key = key.as_ref();
            if !self.state.contains_key(key) {
                self.state.insert(key.to_owned(), Value::Int(0));
            }
        }
    }

    /// Overwrite the named keys unconditionally.
    ///
    /// Used for initial conditions and external injection, outside the
    /// batch-update path.
    pub fn assign_values(&mut self, values: &State) {
        for (key, value) in values {
            self.state.insert(key.clone(), value.clone());
            if let Some(buffer) = self.new_state.as_mut() {
                buffer.insert(key.clone(), value.clone());
            }
        }
    }

    /// Install a schema entry, declaring the key if needed.
    pub fn set_schema_entry(&mut self, key: impl Into<String>, entry: SchemaEntry) {
        let key = key.into();
        self.declare([key.as_str()]);
        self.schema.insert(key, entry);
    }

    /// Mutable access to a key's schema entry, creating a default one.
    pub fn schema_entry_mut(&mut self, key: &str) -> &mut SchemaEntry {
        self.declare([key]);
        self.schema.entry(key.to_owned()).or_default()
    }

    /// The schema entry governing `key`.
    pub fn schema_entry(&self, key: &str) -> &SchemaEntry {
        self.schema.get(key).unwrap_or(&DEFAULT_ENTRY)
    }

    /// Whether a write buffer is open.
    pub const fn is_prepared(&self) -> bool {
        self.new_state.is_some()
    }

    /// Open the write buffer for a batch.
    pub fn prepare(&mut self) -> Result<(), StoreError> {
        if self.new_state.is_some() {
            return Err(StoreError::AlreadyPrepared {
                store: self.id.clone(),
            });
        }
        self.new_state = Some(self.state.clone());
        Ok(())
    }

    /// Fold one process's update into the write buffer.
    pub fn apply_update(&mut self, process: &ProcessId, update: &State) -> Result<(), StoreError> {
        let Some(buffer) = self.new_state.as_mut() else {
            return Err(StoreError::NotPrepared {
                store: self.id.clone(),
            });
        };
        for (key, incoming) in update {
            let Some(current) = buffer.get(key) else {
                return Err(StoreError::MissingKey {
                    store: self.id.clone(),
                    key: key.clone(),
                    process: process.clone(),
                });
            };
            let entry = self.schema.get(key).unwrap_or(&DEFAULT_ENTRY);
            let outcome = entry
                .updater
                .apply(key, buffer, current, incoming)
                .map_err(|source| StoreError::Update {
                    store: self.id.clone(),
                    process: process.clone(),
                    source,
                })?;
            trace!(store = %self.id, %process, key, updater = entry.updater.name(), "applied update");
            buffer.insert(key.clone(), outcome.value);
            buffer.extend(outcome.extra);
        }
        Ok(())
    }

    /// Fold a batch of updates into the write buffer, in list order.
    ///
    /// Order matters for non-commutative updaters such as `set`.
    pub fn apply_updates(&mut self, updates: &[(ProcessId, State)]) -> Result<(), StoreError> {
        for (process, update) in updates {
            self.apply_update(process, update)?;
        }
        Ok(())
    }

    /// Commit the write buffer.
    pub fn proceed(&mut self) -> Result<(), StoreError> {
        let buffer = self.new_state.take().ok_or_else(|| StoreError::NotPrepared {
            store: self.id.clone(),
        })?;
        self.state = buffer;
        Ok(())
    }

    /// Drop an open write buffer without committing it.
    pub fn abort(&mut self) {
        self.new_state = None;
    }

    /// Committed value of one key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Committed values of the given keys. Absent keys are skipped.
    pub fn state_for<K: AsRef<str>>(&self, keys: &[K]) -> State {
        keys.iter()
            .filter_map(|key| {
                let key = key.as_ref();
                self.state.get(key).map(|value| (key.to_owned(), value.clone()))
            })
            .collect()
    }

    /// The full committed state.
    pub const fn to_dict(&self) -> &State {
        &self.state
    }

    /// Split the committed state into two daughter states by schema.
    pub fn divide(&self, rng: &mut dyn RngCore) -> Result<[State; 2], StoreError> {
        let mut first = State::new();
        let mut second = State::new();
        for (key, value) in &self.state {
            let [a, b] = self
                .schema_entry(key)
                .divider
                .divide(value, rng)
                .map_err(|source| StoreError::Divide {
                    store: self.id.clone(),
                    key: key.clone(),
                    source,
                })?;
            first.insert(key.clone(), a);
            second.insert(key.clone(), b);
        }
        Ok([first, second])
    }
}
