//! Per-key update and division strategies.
//!
//! Processes attach schema entries to the keys of their ports; the
//! configuration file can override them per store with plain names:
//!
//! ```yaml
//! schema:
//!   cell:
//!     mass: { updater: set, divide: split }
//!     division: { divide: zero }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use vivarium_types::StoreId;

use crate::divider::Divider;
use crate::updater::Updater;

/// Errors raised while resolving schema configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The configuration names an updater that does not exist.
    #[error("unknown updater `{name}` for key `{key}` in store `{store}`")]
    UnknownUpdater {
        /// Store the entry belongs to.
        store: StoreId,
        /// Key the entry belongs to.
        key: String,
        /// The unrecognised name.
        name: String,
    },

    /// The configuration names a divider that does not exist.
    #[error("unknown divider `{name}` for key `{key}` in store `{store}`")]
    UnknownDivider {
        /// Store the entry belongs to.
        store: StoreId,
        /// Key the entry belongs to.
        key: String,
        /// The unrecognised name.
        name: String,
    },
}

/// How one key is updated and divided.
#[derive(Debug, Clone, Default)]
pub struct SchemaEntry {
    /// Strategy for folding updates into the key.
    pub updater: Updater,
    /// Strategy for splitting the key at division.
    pub divider: Divider,
}

impl SchemaEntry {
    /// An entry with the given updater and the default divider.
    pub fn with_updater(updater: Updater) -> Self {
        Self {
            updater,
            divider: Divider::default(),
        }
    }

    /// An entry with the given divider and the default updater.
    pub fn with_divider(divider: Divider) -> Self {
        Self {
            updater: Updater::default(),
            divider,
        }
    }
}

/// Schema of one store: key → entry. Keys without an entry use defaults.
pub type Schema = BTreeMap<String, SchemaEntry>;

/// One key's entry as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SchemaEntryConfig {
    /// Updater name, if overridden.
    #[serde(default)]
    pub updater: Option<String>,
    /// Divider name, if overridden.
    #[serde(default)]
    pub divide: Option<String>,
}

/// Schema overrides as written in configuration: store → key → entry.
pub type SchemaConfig = BTreeMap<StoreId, BTreeMap<String, SchemaEntryConfig>>;

/// A resolved override: only the parts the configuration named.
#[derive(Debug, Clone, Default)]
pub struct SchemaOverride {
    /// Replacement updater, if any.
    pub updater: Option<Updater>,
    /// Replacement divider, if any.
    pub divider: Option<Divider>,
}

impl SchemaOverride {
    /// Apply this override on top of an existing entry.
    pub fn apply_to(&self, entry: &mut SchemaEntry) {
        if let Some(updater) = &self.updater {
            entry.updater = updater.clone();
        }
        if let Some(divider) = &self.divider {
            entry.divider = divider.clone();
        }
    }
}

/// Resolve configured names against the built-in libraries.
///
/// # Errors
///
/// Returns [`SchemaError`] for the first unknown updater or divider name.
pub fn resolve(
    config: &SchemaConfig,
) -> Result<BTreeMap<StoreId, BTreeMap<String, SchemaOverride>>, SchemaError> {
    let mut resolved = BTreeMap::new();
    for (store, entries) in config {
        let mut store_overrides = BTreeMap::new();
        for (key, entry) in entries {
            let updater = entry
                .updater
                .as_deref()
                .map(|name| {
                    Updater::from_name(name).ok_or_else(|| SchemaError::UnknownUpdater {
                        store: store.clone(),
                        key: key.clone(),
                        name: name.to_owned(),
                    })
                })
                .transpose()?;
            let divider = entry
                .divide
                .as_deref()
                .map(|name| {
                    Divider::from_name(name).ok_or_else(|| SchemaError::UnknownDivider {
                        store: store.clone(),
                        key: key.clone(),
                        name: name.to_owned(),
                    })
                })
                .transpose()?;
            store_overrides.insert(key.clone(), SchemaOverride { updater, divider });
        }
        resolved.insert(store.clone(), store_overrides);
    }
    Ok(resolved)
}
