//! The process contract.
//!
//! A process is a unit of computation that reads a snapshot of the keys it
//! declared on its ports and returns an update for those same keys. It
//! never holds a store: the compartment resolves its ports to stores
//! through the topology, builds the snapshot, and applies the update.
//!
//! Implementors provide [`Process::ports`] and [`Process::next_update`];
//! everything else has a default.

use std::collections::BTreeMap;

use vivarium_types::{PortName, ProcessId, State, StoreId, Value};

use crate::schema::Schema;
use crate::store::Store;

/// Cadence used when a process does not override its time step.
pub const DEFAULT_TIME_STEP: f64 = 1.0;

/// Keys a process reads and writes, per port.
pub type Ports = BTreeMap<PortName, Vec<String>>;

/// Per-port state maps: both the snapshot handed to a process and the
/// update it returns.
pub type PortStates = BTreeMap<PortName, State>;

/// An update returned by a process: port → key → incoming value.
pub type Update = PortStates;

/// Resolved wiring of one process: port → store.
pub type Wiring = BTreeMap<PortName, StoreId>;

/// Errors a process reports from its own computation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    /// The computation failed.
    #[error("{message}")]
    Computation {
        /// Description of the failure.
        message: String,
    },

    /// A key the process needs was absent or of the wrong kind.
    #[error("expected a number at `{port}.{key}`")]
    MissingInput {
        /// The port read from.
        port: String,
        /// The key read.
        key: String,
    },

    /// A construction parameter was invalid.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ProcessError {
    /// A computation failure with the given message.
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }
}

/// Errors raised while invoking a process through its wiring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvocationError {
    /// The process's own computation failed.
    #[error("process `{process}` failed: {source}")]
    Failed {
        /// The failing process.
        process: ProcessId,
        /// The process error.
        source: ProcessError,
    },

    /// The process returned an update for a port it never declared.
    #[error("process `{process}` updated undeclared port `{port}`")]
    UndeclaredPort {
        /// The offending process.
        process: ProcessId,
        /// The undeclared port.
        port: PortName,
    },

    /// A declared port has no wiring.
    #[error("port `{port}` of process `{process}` is not wired")]
    Unwired {
        /// The process.
        process: ProcessId,
        /// The unwired port.
        port: PortName,
    },

    /// A port resolves to a store the compartment does not have.
    #[error("port `{port}` of process `{process}` is wired to missing store `{store}`")]
    MissingStore {
        /// The process.
        process: ProcessId,
        /// The port.
        port: PortName,
        /// The missing store.
        store: StoreId,
    },
}

/// Defaults a process contributes to the stores it is wired to.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    /// Default state per port, gap-filled into the bound store.
    pub state: BTreeMap<PortName, State>,
    /// Keys to emit per port. A port without an entry emits all its keys.
    pub emitter_keys: BTreeMap<PortName, Vec<String>>,
    /// Schema entries per port, installed on the bound store.
    pub schema: BTreeMap<PortName, Schema>,
    /// Preferred cadence in time units.
    pub time_step: f64,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            state: BTreeMap::new(),
            emitter_keys: BTreeMap::new(),
            schema: BTreeMap::new(),
            time_step: DEFAULT_TIME_STEP,
        }
    }
}

/// A unit of computation bound to named ports.
pub trait Process {
    /// Keys this process reads and writes, per port.
    fn ports(&self) -> Ports;

    /// Default state, emitted keys, schema, and time step.
    fn default_settings(&self) -> ProcessSettings {
        ProcessSettings::default()
    }

    /// The cadence this process currently prefers, in time units.
    fn local_timestep(&self) -> f64 {
        self.default_settings().time_step
    }

    /// Called once after the compartment resolved this process's ports.
    fn assign_ports(&mut self, _wiring: &Wiring) {}

    /// Compute the update for an interval of `timestep` from `states`.
    ///
    /// The snapshot is read-only; a process may change its own private
    /// fields (accumulators, RNG state) but nothing else.
    fn next_update(&mut self, timestep: f64, states: &PortStates) -> Result<Update, ProcessError>;
}

/// Snapshot the bound stores, run `next_update`, and check the result.
///
/// Empty per-port maps are dropped from the returned update.
pub fn update_for(
    id: &ProcessId,
    process: &mut dyn Process,
    ports: &Ports,
    wiring: &Wiring,
    stores: &BTreeMap<StoreId, Store>,
    interval: f64,
) -> Result<Update, InvocationError> {
    let mut states = PortStates::new();
    for (port, keys) in ports {
        let store_id = wiring.get(port).ok_or_else(|| InvocationError::Unwired {
            process: id.clone(),
            port: port.clone(),
        })?;
        let store = stores.get(store_id).ok_or_else(|| InvocationError::MissingStore {
            process: id.clone(),
            port: port.clone(),
            store: store_id.clone(),
        })?;
        states.insert(port.clone(), store.state_for(keys));
    }

    let mut update = process
        .next_update(interval, &states)
        .map_err(|source| InvocationError::Failed {
            process: id.clone(),
            source,
        })?;

    if let Some(port) = update.keys().find(|port| !ports.contains_key(*port)) {
        return Err(InvocationError::UndeclaredPort {
            process: id.clone(),
            port: port.clone(),
        });
    }
    update.retain(|_, values| !values.is_empty());
    Ok(update)
}

/// Read a numeric input from a snapshot.
pub fn read_number(states: &PortStates, port: &str, key: &str) -> Result<f64, ProcessError> {
    states
        .get(port)
        .and_then(|values| values.get(key))
        .and_then(Value::as_f64)
        .ok_or_else(|| ProcessError::MissingInput {
            port: port.to_owned(),
            key: key.to_owned(),
        })
}

/// Build a single-port, single-key update.
pub fn single_update(port: &str, key: &str, value: Value) -> Update {
    let mut values = State::new();
    values.insert(key.to_owned(), value);
    let mut update = Update::new();
    update.insert(PortName::from(port), values);
    update
}

/// Build a [`Ports`] map from literal slices.
pub fn ports_from(spec: &[(&str, &[&str])]) -> Ports {
    spec.iter()
        .map(|(port, keys)| {
            (
                PortName::from(*port),
                keys.iter().map(|k| (*k).to_owned()).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    struct Doubler;

    impl Process for Doubler {
        fn ports(&self) -> Ports {
            ports_from(&[("cell", &["mass"])])
        }

        fn next_update(&mut self, _timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
            let mass = read_number(states, "cell", "mass")?;
            Ok(single_update("cell", "mass", Value::Float(mass)))
        }
    }

    struct Rogue;

    impl Process for Rogue {
        fn ports(&self) -> Ports {
            ports_from(&[("cell", &["mass"])])
        }

        fn next_update(&mut self, _timestep: f64, _states: &PortStates) -> Result<Update, ProcessError> {
            Ok(single_update("elsewhere", "mass", Value::Int(1)))
        }
    }

    fn stores() -> BTreeMap<StoreId, Store> {
        let mut state = State::new();
        state.insert("mass".to_owned(), Value::Float(3.0));
        let mut stores = BTreeMap::new();
        stores.insert(StoreId::from("c"), Store::new(StoreId::from("c"), state));
        stores
    }

    fn wiring() -> Wiring {
        let mut wiring = Wiring::new();
        wiring.insert(PortName::from("cell"), StoreId::from("c"));
        wiring
    }

    #[test]
    fn update_for_reads_through_wiring() {
        let mut process = Doubler;
        let ports = process.ports();
        let update = update_for(
            &ProcessId::from("d"),
            &mut process,
            &ports,
            &wiring(),
            &stores(),
            1.0,
        )
        .unwrap();
        assert_eq!(update, single_update("cell", "mass", Value::Float(3.0)));
    }

    #[test]
    fn update_for_rejects_undeclared_ports() {
        let mut process = Rogue;
        let ports = process.ports();
        let err = update_for(
            &ProcessId::from("r"),
            &mut process,
            &ports,
            &wiring(),
            &stores(),
            1.0,
        )
        .unwrap_err();
        assert_eq!(
            err,
            InvocationError::UndeclaredPort {
                process: ProcessId::from("r"),
                port: PortName::from("elsewhere"),
            }
        );
    }

    #[test]
    fn default_timestep_is_one() {
        assert_eq!(Doubler.local_timestep(), DEFAULT_TIME_STEP);
    }

    #[test]
    fn missing_input_is_reported() {
        let err = read_number(&PortStates::new(), "cell", "mass").unwrap_err();
        assert_eq!(err.to_string(), "expected a number at `cell.mass`");
    }
}
