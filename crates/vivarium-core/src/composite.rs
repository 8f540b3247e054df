//! Composites: the processes, topology, and initial state a compartment
//! is built from.
//!
//! A [`Composite`] is inert data. [`Compartment::new`] consumes it, and a
//! [`Composer`] can produce fresh ones on demand, which is how daughter
//! compartments are rebuilt after division.
//!
//! [`Compartment::new`]: crate::compartment::Compartment::new

use std::collections::BTreeMap;

use vivarium_types::{PortName, ProcessId, State, StoreId};

use crate::process::Process;
use crate::schema::SchemaConfig;
use crate::topology::Topology;

/// One layer of processes, in declaration order.
pub type Layer = Vec<(ProcessId, Box<dyn Process>)>;

/// Initial values per store.
pub type InitialState = BTreeMap<StoreId, State>;

/// Errors a composer reports while generating a composite.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// The composer could not build one of its processes.
    #[error("failed to build process `{process}`: {source}")]
    Process {
        /// The process being built.
        process: ProcessId,
        /// The underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Any other composer failure.
    #[error("composer error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

/// Everything needed to build a compartment.
#[derive(Default)]
pub struct Composite {
    /// Ordinary process layers, flattened in order at construction.
    pub processes: Vec<Layer>,
    /// Deriver layers, run with zero interval after every batch.
    pub derivers: Vec<Layer>,
    /// Port wiring for every process and deriver.
    pub topology: Topology,
    /// Per-store schema overrides by name.
    pub schema: SchemaConfig,
    /// Initial values, overwriting process defaults.
    pub initial_state: InitialState,
}

impl Composite {
    /// An empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a process as its own layer.
    #[must_use]
    pub fn with_process(mut self, id: impl Into<ProcessId>, process: Box<dyn Process>) -> Self {
        self.processes.push(vec![(id.into(), process)]);
        self
    }

    /// Append a deriver as its own layer.
    #[must_use]
    pub fn with_deriver(mut self, id: impl Into<ProcessId>, process: Box<dyn Process>) -> Self {
        self.derivers.push(vec![(id.into(), process)]);
        self
    }

    /// Replace the topology.
    #[must_use]
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Replace the schema overrides.
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaConfig) -> Self {
        self.schema = schema;
        self
    }

    /// Replace the initial state.
    #[must_use]
    pub fn with_initial_state(mut self, initial_state: InitialState) -> Self {
        self.initial_state = initial_state;
        self
    }

    /// Wrap a lone process, wiring each port to a store of the same name.
    pub fn from_process(id: impl Into<ProcessId>, process: Box<dyn Process>) -> Self {
        let id = id.into();
        let mut topology = Topology::new();
        for port in process.ports().into_keys() {
            let store = StoreId::new(port.as_str());
            topology.insert(id.clone(), port, store);
        }
        Self::new().with_process(id, process).with_topology(topology)
    }

    /// Number of processes across all layers, derivers included.
    pub fn len(&self) -> usize {
        self.processes
            .iter()
            .chain(&self.derivers)
            .map(Vec::len)
            .sum()
    }

    /// Whether the composite has no processes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every process in declaration order, derivers last.
    pub fn process_ids(&self) -> Vec<ProcessId> {
        self.processes
            .iter()
            .chain(&self.derivers)
            .flatten()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every `(process, port)` pair the topology does not map.
    pub fn unmapped_ports(&self) -> Vec<(ProcessId, PortName)> {
        self.processes
            .iter()
            .chain(&self.derivers)
            .flatten()
            .flat_map(|(id, process)| {
                process
                    .ports()
                    .into_keys()
                    .filter(|port| self.topology.resolve(id, port).is_err())
                    .map(|port| (id.clone(), port))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl core::fmt::Debug for Composite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Composite")
            .field("process_ids", &self.process_ids())
            .field("topology", &self.topology)
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}

/// Generates composites on demand.
///
/// Colonies call [`Composer::generate`] once for the founding compartment
/// and again for every daughter, passing the daughter's divided state as
/// `initial_state`.
pub trait Composer {
    /// Build a fresh composite whose initial state is `initial_state`
    /// layered over the composer's own defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError`] if any process cannot be constructed.
    fn generate(&self, initial_state: &InitialState) -> Result<Composite, ComposeError>;
}

impl<F> Composer for F
where
    F: Fn(&InitialState) -> Result<Composite, ComposeError>,
{
    fn generate(&self, initial_state: &InitialState) -> Result<Composite, ComposeError> {
        self(initial_state)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::process::{PortStates, Ports, ProcessError, Update, ports_from};

    struct Reader;

    impl Process for Reader {
        fn ports(&self) -> Ports {
            ports_from(&[("cell", &["mass"]), ("environment", &["glucose"])])
        }

        fn next_update(&mut self, _timestep: f64, _states: &PortStates) -> Result<Update, ProcessError> {
            Ok(Update::new())
        }
    }

    #[test]
    fn from_process_wires_ports_to_same_named_stores() {
        let composite = Composite::from_process("reader", Box::new(Reader));
        let id = ProcessId::from("reader");
        assert_eq!(
            composite.topology.resolve(&id, &PortName::from("cell")).unwrap(),
            &StoreId::from("cell")
        );
        assert_eq!(
            composite
                .topology
                .resolve(&id, &PortName::from("environment"))
                .unwrap(),
            &StoreId::from("environment")
        );
        assert!(composite.unmapped_ports().is_empty());
    }

    #[test]
    fn counts_and_orders_processes_with_derivers_last() {
        let composite = Composite::new()
            .with_deriver("d", Box::new(Reader))
            .with_process("a", Box::new(Reader))
            .with_process("b", Box::new(Reader));
        assert_eq!(composite.len(), 3);
        assert_eq!(
            composite.process_ids(),
            vec![ProcessId::from("a"), ProcessId::from("b"), ProcessId::from("d")]
        );
        assert_eq!(composite.unmapped_ports().len(), 6);
    }

    #[test]
    fn closures_are_composers() {
        let composer = |initial: &InitialState| {
            Ok::<_, ComposeError>(
                Composite::from_process("reader", Box::new(Reader)).with_initial_state(initial.clone()),
            )
        };
        let mut initial = InitialState::new();
        initial.insert(StoreId::from("cell"), State::new());
        let composite = composer.generate(&initial).unwrap();
        assert_eq!(composite.initial_state.len(), 1);
        assert!(!composite.is_empty());
    }
}
