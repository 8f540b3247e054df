//! Topology: static wiring of process ports to stores.
//!
//! The topology is plain data, `{process: {port: store}}`, and is checked
//! in full before any store exists: every port a process declares must be
//! mapped, or construction fails naming the process and the port.
//!
//! Store construction happens in two passes over the processes, always in
//! declaration order:
//!
//! 1. [`initialize_state`] gap-fills each process's default sub-state into
//!    the store its port resolves to (earlier processes win), overlays
//!    caller-supplied initial values, and installs schema entries.
//! 2. [`connect_topology`] resolves each process's wiring and declares its
//!    port keys on the bound stores.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use vivarium_types::{PortName, ProcessId, State, StoreId, ValueError, fill_gaps};

use crate::process::{Ports, ProcessSettings, Wiring};
use crate::schema::{self, SchemaConfig, SchemaError};
use crate::store::Store;

/// Errors raised while wiring processes to stores.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    /// A declared port has no topology entry.
    #[error("port `{port}` of process `{process}` has no topology entry")]
    UnmappedPort {
        /// The process declaring the port.
        process: ProcessId,
        /// The unmapped port.
        port: PortName,
    },

    /// Two processes declared different defaults for the same key.
    #[error("process `{process}` declares a default for `{store}.{key}` that conflicts with an earlier process")]
    ConflictingDefault {
        /// The store holding the key.
        store: StoreId,
        /// Dotted path of the conflicting key.
        key: String,
        /// The later process whose default was ignored.
        process: ProcessId,
    },

    /// Default states could not be merged.
    #[error("failed to merge defaults for store `{store}`: {source}")]
    Merge {
        /// The store being initialised.
        store: StoreId,
        /// The underlying merge error.
        source: ValueError,
    },

    /// Schema configuration names a store no process is wired to.
    #[error("schema configuration references unknown store `{store}`")]
    UnknownStore {
        /// The unknown store.
        store: StoreId,
    },

    /// Schema configuration could not be resolved.
    #[error("schema error: {source}")]
    Schema {
        /// The underlying schema error.
        #[from]
        source: SchemaError,
    },
}

/// `{process: {port: store}}` wiring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology(pub BTreeMap<ProcessId, BTreeMap<PortName, StoreId>>);

impl Topology {
    /// An empty topology.
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Map one port, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, process: &str, port: &str, store: &str) -> Self {
        self.insert(ProcessId::from(process), PortName::from(port), StoreId::from(store));
        self
    }

    /// Map one port.
    pub fn insert(&mut self, process: ProcessId, port: PortName, store: StoreId) {
        self.0.entry(process).or_default().insert(port, store);
    }

    /// The store a process's port is wired to.
    pub fn resolve(&self, process: &ProcessId, port: &PortName) -> Result<&StoreId, TopologyError> {
        self.0
            .get(process)
            .and_then(|ports| ports.get(port))
            .ok_or_else(|| TopologyError::UnmappedPort {
                process: process.clone(),
                port: port.clone(),
            })
    }

    /// Resolve every declared port of one process.
    pub fn wiring_for(&self, process: &ProcessId, ports: &Ports) -> Result<Wiring, TopologyError> {
        ports
            .keys()
            .map(|port| Ok((port.clone(), self.resolve(process, port)?.clone())))
            .collect()
    }

    /// Every store named anywhere in the topology.
    pub fn stores(&self) -> BTreeSet<StoreId> {
        self.0.values().flat_map(|ports| ports.values().cloned()).collect()
    }

    /// Merge `other` into this topology; `other` wins on shared ports.
    pub fn extend(&mut self, other: Self) {
        for (process, ports) in other.0 {
            self.0.entry(process).or_default().extend(ports);
        }
    }
}

/// What construction needs to know about one process.
#[derive(Debug, Clone, Copy)]
pub struct Declaration<'a> {
    /// The process's topology key.
    pub id: &'a ProcessId,
    /// Its declared ports.
    pub ports: &'a Ports,
    /// Its default settings.
    pub settings: &'a ProcessSettings,
}

/// Options controlling [`initialize_state`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Treat conflicting defaults between processes as an error.
    pub strict_defaults: bool,
}

/// Build one store per distinct store id from process defaults.
///
/// `overrides` replaces named keys after defaults are merged; `schema`
/// overrides are applied after process schema entries.
pub fn initialize_state(
    declarations: &[Declaration<'_>],
    topology: &Topology,
    overrides: &BTreeMap<StoreId, State>,
    schema: &SchemaConfig,
    options: InitOptions,
) -> Result<BTreeMap<StoreId, Store>, TopologyError> {
    let mut defaults: BTreeMap<StoreId, State> = BTreeMap::new();

    for decl in declarations {
        let ports = decl.ports.keys().chain(decl.settings.state.keys());
        for port in ports {
            let store_id = topology.resolve(decl.id, port)?;
            let merged = defaults.entry(store_id.clone()).or_default();
            let Some(default) = decl.settings.state.get(port) else {
                continue;
            };
            let conflicts = fill_gaps(merged, default).map_err(|source| TopologyError::Merge {
                store: store_id.clone(),
                source,
            })?;
            for key in conflicts {
                if options.strict_defaults {
                    return Err(TopologyError::ConflictingDefault {
                        store: store_id.clone(),
                        key,
                        process: decl.id.clone(),
                    });
                }
                warn!(
                    store = %store_id,
                    key,
                    process = %decl.id,
                    "conflicting default ignored, keeping the earlier process's value"
                );
            }
        }
    }

    let mut stores: BTreeMap<StoreId, Store> = defaults
        .into_iter()
        .map(|(id, state)| (id.clone(), Store::new(id, state)))
        .collect();

    for (store_id, values) in overrides {
        stores
            .entry(store_id.clone())
            .or_insert_with(|| Store::new(store_id.clone(), State::new()))
            .assign_values(values);
    }

    for decl in declarations {
        for (port, entries) in &decl.settings.schema {
            let store_id = topology.resolve(decl.id, port)?;
            if let Some(store) = stores.get_mut(store_id) {
                for (key, entry) in entries {
                    store.set_schema_entry(key.clone(), entry.clone());
                }
            }
        }
    }

    for (store_id, keys) in schema::resolve(schema)? {
        let store = stores
            .get_mut(&store_id)
            .ok_or_else(|| TopologyError::UnknownStore {
                store: store_id.clone(),
            })?;
        for (key, schema_override) in keys {
            schema_override.apply_to(store.schema_entry_mut(&key));
        }
    }

    debug!(store_count = stores.len(), "stores initialized");
    Ok(stores)
}

/// Resolve every process's wiring and declare its keys on bound stores.
///
/// Returns one [`Wiring`] per declaration, in the same order.
pub fn connect_topology(
    declarations: &[Declaration<'_>],
    topology: &Topology,
    stores: &mut BTreeMap<StoreId, Store>,
) -> Result<Vec<Wiring>, TopologyError> {
    declarations
        .iter()
        .map(|decl| {
            let wiring = topology.wiring_for(decl.id, decl.ports)?;
            for (port, keys) in decl.ports {
                let store_id = topology.resolve(decl.id, port)?;
                let store = stores
                    .entry(store_id.clone())
                    .or_insert_with(|| Store::new(store_id.clone(), State::new()));
                store.declare(keys);
            }
            Ok(wiring)
        })
        .collect()
}
