//! The compartment: stores, wired processes, and the multi-rate scheduler.
//!
//! A compartment owns every store of one simulated agent together with the
//! processes and derivers wired to them. [`Compartment::update`] advances
//! the ordinary processes across one external timestep, letting each run
//! at its own cadence:
//!
//! - every process has a *front*: the time its latest update reaches and
//!   the update itself, not yet applied;
//! - processes whose front is at or behind the current time compute their
//!   next update over `min(front + step, end) - front`;
//! - the earliest front becomes the next sync point; every pending update
//!   whose front reached it is applied as one batch, in declaration order;
//! - after each batch the derivers run once on the committed state with
//!   a zero interval and their updates are committed as a second batch.
//!
//! Time is counted in integer ticks, so fronts land exactly on the end of
//! the external step and no update is applied after a read by a process
//! whose clock is earlier.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{debug, info, trace};
use vivarium_types::{
    AgentId, ConfigurationRecord, EmitRecord, EmitTable, ExperimentId, ProcessId, RecordError,
    State, StoreId, TIME_KEY, Value,
};

use crate::clock::{ClockError, SimTime};
use crate::composite::{Composite, InitialState};
use crate::emitter::{Emitter, NullEmitter};
use crate::process::{
    DEFAULT_TIME_STEP, InvocationError, Ports, Process, ProcessSettings, Update, Wiring, update_for,
};
use crate::schema::SchemaConfig;
use crate::store::{Store, StoreError};
use crate::topology::{self, Declaration, InitOptions, Topology, TopologyError};

/// Id of the store holding compartment bookkeeping such as `time`.
pub const META_STORE: &str = "_compartment";

/// Two daughter states, store → state.
pub type DaughterState = BTreeMap<StoreId, State>;

/// Predicate deciding whether a compartment should divide.
pub type DivideCondition = Rc<dyn Fn(&Compartment) -> bool>;

/// Replacement for the schema-driven division of store state.
pub type DivideHook = Rc<dyn Fn(&Compartment) -> Result<[DaughterState; 2], CompartmentError>>;

/// Errors raised while building or running a compartment.
#[derive(Debug, thiserror::Error)]
pub enum CompartmentError {
    /// The composite contains no processes.
    #[error("composite has no processes")]
    Empty,

    /// Two processes share an id.
    #[error("process id `{process}` is used more than once")]
    DuplicateProcess {
        /// The repeated id.
        process: ProcessId,
    },

    /// Wiring failed.
    #[error("topology error: {source}")]
    Topology {
        /// The underlying topology error.
        #[from]
        source: TopologyError,
    },

    /// A process declared an unusable time step.
    #[error("invalid time step for process `{process}`: {source}")]
    ProcessTimestep {
        /// The process.
        process: ProcessId,
        /// The underlying clock error.
        source: ClockError,
    },

    /// The external timestep or the clock was invalid.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A process failed or violated its port contract.
    #[error("process error: {source}")]
    Process {
        /// The underlying invocation error.
        #[from]
        source: InvocationError,
    },

    /// Applying a batch or dividing a store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// An update was routed to a store that does not exist.
    #[error("update routed to unknown store `{store}`")]
    UnknownStore {
        /// The missing store.
        store: StoreId,
    },

    /// A record could not be built for emission.
    #[error("record error: {source}")]
    Record {
        /// The underlying record error.
        #[from]
        source: RecordError,
    },

    /// A caller-supplied divide hook failed.
    #[error("divide hook failed: {message}")]
    DivideHook {
        /// Description of the failure.
        message: String,
    },
}

/// Construction options for a [`Compartment`].
pub struct CompartmentOptions {
    /// Lineage name of the compartment.
    pub agent_id: AgentId,
    /// Experiment the compartment belongs to.
    pub experiment_id: ExperimentId,
    /// Seed for the division RNG.
    pub seed: u64,
    /// Simulated time the compartment starts at.
    pub start_time: SimTime,
    /// Sink for emitted records.
    pub emitter: Box<dyn Emitter>,
    /// Predicate checked by runners after each update.
    pub divide_condition: Option<DivideCondition>,
    /// Replacement for schema-driven division.
    pub divide_state: Option<DivideHook>,
    /// Treat conflicting process defaults as an error.
    pub strict_defaults: bool,
}

impl Default for CompartmentOptions {
    fn default() -> Self {
        Self {
            agent_id: AgentId::from("0"),
            experiment_id: ExperimentId::new(),
            seed: 0,
            start_time: SimTime::ZERO,
            emitter: Box::new(NullEmitter),
            divide_condition: None,
            divide_state: None,
            strict_defaults: false,
        }
    }
}

impl CompartmentOptions {
    /// Set the agent id.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Set the experiment id.
    #[must_use]
    pub const fn with_experiment_id(mut self, experiment_id: ExperimentId) -> Self {
        self.experiment_id = experiment_id;
        self
    }

    /// Set the division RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the starting simulated time.
    #[must_use]
    pub const fn with_start_time(mut self, start_time: SimTime) -> Self {
        self.start_time = start_time;
        self
    }

    /// Set the emitter.
    #[must_use]
    pub fn with_emitter(mut self, emitter: impl Emitter + 'static) -> Self {
        self.emitter = Box::new(emitter);
        self
    }

    /// Set the divide condition.
    #[must_use]
    pub fn with_divide_condition(mut self, condition: DivideCondition) -> Self {
        self.divide_condition = Some(condition);
        self
    }

    /// Set the divide-state hook.
    #[must_use]
    pub fn with_divide_state(mut self, hook: DivideHook) -> Self {
        self.divide_state = Some(hook);
        self
    }

    /// Reject conflicting process defaults.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.strict_defaults = true;
        self
    }
}

impl core::fmt::Debug for CompartmentOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompartmentOptions")
            .field("agent_id", &self.agent_id)
            .field("experiment_id", &self.experiment_id)
            .field("seed", &self.seed)
            .field("start_time", &self.start_time)
            .field("divide_condition", &self.divide_condition.is_some())
            .field("divide_state", &self.divide_state.is_some())
            .field("strict_defaults", &self.strict_defaults)
            .finish_non_exhaustive()
    }
}

/// Divide when a store key is truthy.
pub fn divide_on_flag(store: impl Into<StoreId>, key: impl Into<String>) -> DivideCondition {
    let store = store.into();
    let key = key.into();
    Rc::new(move |compartment: &Compartment| {
        compartment
            .store(store.as_str())
            .and_then(|s| s.get(&key))
            .is_some_and(Value::is_truthy)
    })
}

/// A process bound into a compartment.
struct Slot {
    id: ProcessId,
    process: Box<dyn Process>,
    ports: Ports,
    wiring: Wiring,
}

/// Where a process stands within the current external step.
#[derive(Default)]
struct Front {
    time: SimTime,
    update: Option<Update>,
}

/// A process's front as observed after the last update.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontStatus {
    /// The process.
    pub process: ProcessId,
    /// How far into the external step its updates reached.
    pub time: f64,
    /// Whether an update was left unapplied.
    pub pending: bool,
}

/// Per-store update lists, each in declaration order.
type Batch = BTreeMap<StoreId, Vec<(ProcessId, State)>>;

/// Stores, processes, and derivers of one simulated agent.
pub struct Compartment {
    agent_id: AgentId,
    experiment_id: ExperimentId,
    processes: Vec<Slot>,
    derivers: Vec<Slot>,
    order: Vec<ProcessId>,
    stores: BTreeMap<StoreId, Store>,
    topology: Topology,
    emit_keys: BTreeMap<StoreId, Vec<String>>,
    local_time: SimTime,
    time_step: f64,
    last_fronts: Vec<FrontStatus>,
    divide_condition: Option<DivideCondition>,
    divide_state: Option<DivideHook>,
    emitter: Box<dyn Emitter>,
    rng: StdRng,
}

impl Compartment {
    /// Wire a composite into a compartment.
    ///
    /// Builds every store from process defaults and `initial_state`,
    /// resolves all ports, and emits a configuration record followed by a
    /// history record of the initial state.
    ///
    /// # Errors
    ///
    /// Fails without partial wiring on an empty composite, duplicate
    /// process ids, invalid time steps, unmapped ports, unknown schema
    /// names, or (in strict mode) conflicting defaults.
    pub fn new(composite: Composite, options: CompartmentOptions) -> Result<Self, CompartmentError> {
        if composite.is_empty() {
            return Err(CompartmentError::Empty);
        }
        let Composite {
            processes,
            derivers,
            topology,
            schema,
            initial_state,
        } = composite;

        let mut seen = BTreeSet::new();
        let mut order = Vec::new();
        let mut slots = Vec::new();
        let mut settings = Vec::new();
        let ordinary_count: usize = processes.iter().map(Vec::len).sum();
        for (id, process) in processes.into_iter().chain(derivers).flatten() {
            if !seen.insert(id.clone()) {
                return Err(CompartmentError::DuplicateProcess { process: id });
            }
            let process_settings = process.default_settings();
            SimTime::timestep(process_settings.time_step).map_err(|source| {
                CompartmentError::ProcessTimestep {
                    process: id.clone(),
                    source,
                }
            })?;
            order.push(id.clone());
            slots.push(Slot {
                ports: process.ports(),
                wiring: Wiring::new(),
                id,
                process,
            });
            settings.push(process_settings);
        }

        let mut stores = wire(&mut slots, &settings, &topology, &initial_state, &schema, options.strict_defaults)?;
        stores
            .entry(StoreId::from(META_STORE))
            .or_insert_with(|| Store::new(StoreId::from(META_STORE), State::new()))
            .assign_values(&time_entry(options.start_time));

        let emit_keys = emitted_keys(&slots, &settings);
        let time_step = settings
            .iter()
            .take(ordinary_count)
            .map(|s| s.time_step)
            .reduce(f64::max)
            .unwrap_or(DEFAULT_TIME_STEP);

        let derivers = slots.split_off(ordinary_count);
        let mut compartment = Self {
            agent_id: options.agent_id,
            experiment_id: options.experiment_id,
            processes: slots,
            derivers,
            order,
            stores,
            topology,
            emit_keys,
            local_time: options.start_time,
            time_step,
            last_fronts: Vec::new(),
            divide_condition: options.divide_condition,
            divide_state: options.divide_state,
            emitter: options.emitter,
            rng: StdRng::seed_from_u64(options.seed),
        };

        info!(
            agent_id = %compartment.agent_id,
            processes = compartment.processes.len(),
            derivers = compartment.derivers.len(),
            stores = compartment.stores.len(),
            time_step = compartment.time_step,
            "compartment built"
        );
        compartment.emit_configuration()?;
        compartment.emit_history();
        Ok(compartment)
    }

    /// Advance every ordinary process by `timestep` time units.
    ///
    /// # Errors
    ///
    /// Any process, store, or clock failure aborts the call; stores are
    /// left at their last committed batch.
    pub fn update(&mut self, timestep: f64) -> Result<(), CompartmentError> {
        self.advance(SimTime::from_units(timestep)?)
    }

    /// Advance every ordinary process by `external` ticks.
    ///
    /// # Errors
    ///
    /// See [`Compartment::update`].
    pub fn advance(&mut self, external: SimTime) -> Result<(), CompartmentError> {
        let end = self.local_time.checked_add(external)?;
        let mut fronts: Vec<Front> = self.processes.iter().map(|_| Front::default()).collect();
        let mut time = SimTime::ZERO;
        let mut batches = 0_u64;

        while time < external {
            for (slot, front) in self.processes.iter_mut().zip(fronts.iter_mut()) {
                if front.time > time {
                    continue;
                }
                let step = SimTime::timestep(slot.process.local_timestep()).map_err(|source| {
                    CompartmentError::ProcessTimestep {
                        process: slot.id.clone(),
                        source,
                    }
                })?;
                let next = front.time.saturating_add(step).min(external);
                let interval = next.saturating_sub(front.time).as_units();
                let update = update_for(
                    &slot.id,
                    slot.process.as_mut(),
                    &slot.ports,
                    &slot.wiring,
                    &self.stores,
                    interval,
                )?;
                trace!(process = %slot.id, interval, "computed update");
                front.update = Some(update);
                front.time = next;
            }

            let future = fronts.iter().map(|f| f.time).min().unwrap_or(external);
            let mut batch = Batch::new();
            for (slot, front) in self.processes.iter().zip(fronts.iter_mut()) {
                if front.time > future {
                    continue;
                }
                if let Some(update) = front.update.take() {
                    route(slot, update, &mut batch)?;
                }
            }
            self.send_updates(&batch)?;
            batches = batches.saturating_add(1);
            time = future;
        }

        self.last_fronts = self
            .processes
            .iter()
            .zip(&fronts)
            .map(|(slot, front)| FrontStatus {
                process: slot.id.clone(),
                time: front.time.as_units(),
                pending: front.update.is_some(),
            })
            .collect();

        self.local_time = end;
        if let Some(meta) = self.stores.get_mut(META_STORE) {
            meta.assign_values(&time_entry(end));
        }
        debug!(agent_id = %self.agent_id, time = %end, batches, "compartment advanced");
        self.emit_history();
        Ok(())
    }

    /// Apply one batch, then run the derivers on the result.
    fn send_updates(&mut self, batch: &Batch) -> Result<(), CompartmentError> {
        self.commit(batch)?;
        if self.derivers.is_empty() {
            return Ok(());
        }
        let mut derived = Batch::new();
        for slot in &mut self.derivers {
            let update = update_for(
                &slot.id,
                slot.process.as_mut(),
                &slot.ports,
                &slot.wiring,
                &self.stores,
                0.0,
            )?;
            trace!(deriver = %slot.id, "computed derived update");
            route(slot, update, &mut derived)?;
        }
        self.commit(&derived)
    }

    /// Prepare every store, apply `batch`, and proceed; abort all on error.
    fn commit(&mut self, batch: &Batch) -> Result<(), CompartmentError> {
        let result = self.apply_batch(batch);
        if result.is_err() {
            for store in self.stores.values_mut() {
                store.abort();
            }
        }
        result
    }

    fn apply_batch(&mut self, batch: &Batch) -> Result<(), CompartmentError> {
        for store in self.stores.values_mut() {
            store.prepare()?;
        }
        for (store_id, updates) in batch {
            let store = self
                .stores
                .get_mut(store_id)
                .ok_or_else(|| CompartmentError::UnknownStore {
                    store: store_id.clone(),
                })?;
            store.apply_updates(updates)?;
        }
        for store in self.stores.values_mut() {
            store.proceed()?;
        }
        Ok(())
    }

    /// Whether the divide condition holds now.
    pub fn should_divide(&self) -> bool {
        self.divide_condition
            .as_ref()
            .is_some_and(|condition| condition(self))
    }

    /// Split every store into two daughter states.
    ///
    /// Uses the divide-state hook when one is configured; otherwise each
    /// key is divided by its schema divider. The meta store is skipped.
    ///
    /// # Errors
    ///
    /// Returns the first divider or hook failure.
    pub fn divide_state(&mut self) -> Result<[DaughterState; 2], CompartmentError> {
        if let Some(hook) = &self.divide_state {
            return hook(self);
        }
        let mut first = DaughterState::new();
        let mut second = DaughterState::new();
        for (id, store) in &self.stores {
            if id.as_str() == META_STORE {
                continue;
            }
            let [a, b] = store.divide(&mut self.rng)?;
            first.insert(id.clone(), a);
            second.insert(id.clone(), b);
        }
        Ok([first, second])
    }

    /// Draw a seed for a daughter's division RNG.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.next_u64()
    }

    /// Emit a record through this compartment's emitter.
    pub fn emit(&mut self, record: EmitRecord) {
        self.emitter.emit(record);
    }

    fn emit_configuration(&mut self) -> Result<(), CompartmentError> {
        let record = ConfigurationRecord {
            experiment_id: self.experiment_id,
            agent_id: self.agent_id.clone(),
            topology: self.topology.0.clone(),
            process_order: self.order.clone(),
            derivers: self.derivers.iter().map(|slot| slot.id.clone()).collect(),
            created_at: Utc::now(),
        };
        let record = EmitRecord::from_serializable(EmitTable::Configuration, &record)?;
        self.emitter.emit(record);
        Ok(())
    }

    fn emit_history(&mut self) {
        let snapshot = self
            .emit_keys
            .iter()
            .filter_map(|(id, keys)| self.stores.get(id).map(|store| (id.clone(), store.state_for(keys))))
            .collect();
        let record = EmitRecord::history(self.local_time.as_units(), snapshot);
        self.emitter.emit(record);
    }

    /// The compartment's lineage name.
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// The experiment this compartment belongs to.
    pub const fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    /// Simulated time in units.
    pub fn local_time(&self) -> f64 {
        self.local_time.as_units()
    }

    /// Simulated time in ticks.
    pub const fn local_ticks(&self) -> SimTime {
        self.local_time
    }

    /// The longest time step among ordinary processes.
    pub const fn time_step(&self) -> f64 {
        self.time_step
    }

    /// Process ids in declaration order, derivers last.
    pub fn process_order(&self) -> &[ProcessId] {
        &self.order
    }

    /// The topology the compartment was wired with.
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Fronts of the ordinary processes after the last update.
    pub fn fronts(&self) -> &[FrontStatus] {
        &self.last_fronts
    }

    /// One store.
    pub fn store(&self, id: &str) -> Option<&Store> {
        self.stores.get(id)
    }

    /// Every store.
    pub const fn stores(&self) -> &BTreeMap<StoreId, Store> {
        &self.stores
    }

    /// Committed values of `keys` in one store.
    pub fn state_for<K: AsRef<str>>(&self, store: &str, keys: &[K]) -> Option<State> {
        self.stores.get(store).map(|s| s.state_for(keys))
    }

    /// Full committed state of every store.
    pub fn to_dict(&self) -> BTreeMap<StoreId, State> {
        self.stores
            .iter()
            .map(|(id, store)| (id.clone(), store.to_dict().clone()))
            .collect()
    }

    /// Overwrite store values outside the batch path.
    pub fn assign_values(&mut self, store: &str, values: &State) -> Result<(), CompartmentError> {
        let target = self
            .stores
            .get_mut(store)
            .ok_or_else(|| CompartmentError::UnknownStore {
                store: StoreId::from(store),
            })?;
        target.assign_values(values);
        Ok(())
    }

    /// Predicate and hook, for building daughters that divide the same way.
    pub fn divide_rules(&self) -> (Option<DivideCondition>, Option<DivideHook>) {
        (self.divide_condition.clone(), self.divide_state.clone())
    }
}

impl core::fmt::Debug for Compartment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Compartment")
            .field("agent_id", &self.agent_id)
            .field("order", &self.order)
            .field("stores", &self.stores)
            .field("local_time", &self.local_time)
            .finish_non_exhaustive()
    }
}

/// Build stores and resolve the wiring of every slot.
fn wire(
    slots: &mut [Slot],
    settings: &[ProcessSettings],
    topology: &Topology,
    initial_state: &InitialState,
    schema: &SchemaConfig,
    strict_defaults: bool,
) -> Result<BTreeMap<StoreId, Store>, CompartmentError> {
    let declarations: Vec<Declaration<'_>> = slots
        .iter()
        .zip(settings)
        .map(|(slot, settings)| Declaration {
            id: &slot.id,
            ports: &slot.ports,
            settings,
        })
        .collect();
    let mut stores = topology::initialize_state(
        &declarations,
        topology,
        initial_state,
        schema,
        InitOptions { strict_defaults },
    )?;
    let wirings = topology::connect_topology(&declarations, topology, &mut stores)?;

    for (slot, wiring) in slots.iter_mut().zip(wirings) {
        slot.process.assign_ports(&wiring);
        slot.wiring = wiring;
    }
    Ok(stores)
}

/// Keys emitted per store: each port's `emitter_keys`, or all its keys.
fn emitted_keys(slots: &[Slot], settings: &[ProcessSettings]) -> BTreeMap<StoreId, Vec<String>> {
    let mut keys: BTreeMap<StoreId, BTreeSet<String>> = BTreeMap::new();
    for (slot, settings) in slots.iter().zip(settings) {
        for (port, port_keys) in &slot.ports {
            let Some(store) = slot.wiring.get(port) else {
                continue;
            };
            if store.as_str() == META_STORE {
                continue;
            }
            let emitted = settings.emitter_keys.get(port).unwrap_or(port_keys);
            keys.entry(store.clone()).or_default().extend(emitted.iter().cloned());
        }
    }
    keys.into_iter()
        .map(|(store, keys)| (store, keys.into_iter().collect()))
        .collect()
}

/// Route each port of an update to the store it is wired to.
fn route(slot: &Slot, update: Update, batch: &mut Batch) -> Result<(), InvocationError> {
    for (port, values) in update {
        let store = slot.wiring.get(&port).ok_or_else(|| InvocationError::Unwired {
            process: slot.id.clone(),
            port: port.clone(),
        })?;
        batch
            .entry(store.clone())
            .or_default()
            .push((slot.id.clone(), values));
    }
    Ok(())
}

fn time_entry(time: SimTime) -> State {
    let mut state = State::new();
    state.insert(TIME_KEY.to_owned(), Value::Float(time.as_units()));
    state
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::cell::RefCell;

    use proptest::prelude::*;

    use super::*;
    use crate::emitter::RamEmitter;
    use crate::process::{PortStates, ProcessError, read_number, single_update};
    use crate::schema::SchemaEntry;
    use crate::divider::Divider;
    use crate::updater::Updater;

    /// Adds `rate * dt` to a counter and records every interval it saw.
    struct Ticker {
        step: f64,
        key: &'static str,
        intervals: Rc<RefCell<Vec<f64>>>,
    }

    impl Ticker {
        fn new(step: f64, key: &'static str) -> (Self, Rc<RefCell<Vec<f64>>>) {
            let intervals = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    step,
                    key,
                    intervals: Rc::clone(&intervals),
                },
                intervals,
            )
        }
    }

    impl Process for Ticker {
        fn ports(&self) -> Ports {
            let mut ports = Ports::new();
            ports.insert("cell".into(), vec![self.key.to_owned()]);
            ports
        }

        fn default_settings(&self) -> ProcessSettings {
            ProcessSettings {
                time_step: self.step,
                ..ProcessSettings::default()
            }
        }

        fn next_update(&mut self, timestep: f64, _states: &PortStates) -> Result<Update, ProcessError> {
            self.intervals.borrow_mut().push(timestep);
            Ok(single_update("cell", self.key, Value::Float(timestep)))
        }
    }

    /// Writes `double = 2 * mass` with the set updater.
    struct Doubler;

    impl Process for Doubler {
        fn ports(&self) -> Ports {
            crate::process::ports_from(&[("cell", &["mass", "double"])])
        }

        fn default_settings(&self) -> ProcessSettings {
            let mut settings = ProcessSettings::default();
            let mut schema = crate::schema::Schema::new();
            schema.insert("double".to_owned(), SchemaEntry::with_updater(Updater::Set));
            settings.schema.insert("cell".into(), schema);
            settings
        }

        fn next_update(&mut self, _timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
            let mass = read_number(states, "cell", "mass")?;
            Ok(single_update("cell", "double", Value::Float(mass * 2.0)))
        }
    }

    /// Adds one unit of mass per unit time and checks the deriver kept up.
    struct Grower {
        mismatches: Rc<RefCell<u32>>,
    }

    impl Process for Grower {
        fn ports(&self) -> Ports {
            crate::process::ports_from(&[("cell", &["mass", "double"])])
        }

        fn default_settings(&self) -> ProcessSettings {
            ProcessSettings {
                time_step: 0.25,
                ..ProcessSettings::default()
            }
        }

        fn next_update(&mut self, timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
            let mass = read_number(states, "cell", "mass")?;
            let double = read_number(states, "cell", "double")?;
            if (double - mass * 2.0).abs() > 1e-12 {
                let mut mismatches = self.mismatches.borrow_mut();
                *mismatches = mismatches.saturating_add(1);
            }
            Ok(single_update("cell", "mass", Value::Float(timestep)))
        }
    }

    struct Failing;

    impl Process for Failing {
        fn ports(&self) -> Ports {
            crate::process::ports_from(&[("cell", &["mass"])])
        }

        fn next_update(&mut self, _timestep: f64, _states: &PortStates) -> Result<Update, ProcessError> {
            Err(ProcessError::computation("boom"))
        }
    }

    fn cell_topology(ids: &[&str]) -> Topology {
        ids.iter()
            .fold(Topology::new(), |topology, id| topology.with(id, "cell", "cell"))
    }

    #[test]
    fn heterogeneous_rates_run_at_their_own_cadence() {
        let (fast, fast_calls) = Ticker::new(0.1, "fast");
        let (slow, slow_calls) = Ticker::new(1.0, "slow");
        let composite = Composite::new()
            .with_process("fast", Box::new(fast))
            .with_process("slow", Box::new(slow))
            .with_topology(cell_topology(&["fast", "slow"]));
        let mut compartment = Compartment::new(composite, CompartmentOptions::default()).unwrap();

        for _ in 0..5 {
            compartment.update(1.0).unwrap();
        }

        assert_eq!(fast_calls.borrow().len(), 50);
        assert_eq!(slow_calls.borrow().len(), 5);
        assert_eq!(compartment.local_time(), 5.0);
        let cell = compartment.store("cell").unwrap();
        assert!((cell.get("fast").and_then(Value::as_f64).unwrap() - 5.0).abs() < 1e-9);
        assert!((cell.get("slow").and_then(Value::as_f64).unwrap() - 5.0).abs() < 1e-9);
        assert!(compartment.fronts().iter().all(|f| f.time == 1.0 && !f.pending));
    }

    #[test]
    fn long_steps_are_clipped_to_the_external_step() {
        let (slow, calls) = Ticker::new(10.0, "slow");
        let composite = Composite::from_process("slow", Box::new(slow));
        let mut compartment = Compartment::new(composite, CompartmentOptions::default()).unwrap();
        compartment.update(1.0).unwrap();
        assert_eq!(*calls.borrow(), vec![1.0]);
        assert_eq!(compartment.time_step(), 10.0);
    }

    #[test]
    fn derivers_see_every_batch() {
        let mismatches = Rc::new(RefCell::new(0));
        let composite = Composite::new()
            .with_process(
                "grower",
                Box::new(Grower {
                    mismatches: Rc::clone(&mismatches),
                }),
            )
            .with_deriver("doubler", Box::new(Doubler))
            .with_topology(cell_topology(&["grower", "doubler"]));
        let mut compartment = Compartment::new(composite, CompartmentOptions::default()).unwrap();
        compartment.update(2.0).unwrap();

        assert_eq!(*mismatches.borrow(), 0);
        let cell = compartment.store("cell").unwrap();
        assert_eq!(cell.get("mass"), Some(&Value::Float(2.0)));
        assert_eq!(cell.get("double"), Some(&Value::Float(4.0)));
        assert_eq!(compartment.process_order().len(), 2);
    }

    #[test]
    fn process_failure_aborts_update_and_keeps_committed_state() {
        let (ticker, _) = Ticker::new(1.0, "mass");
        let composite = Composite::new()
            .with_process("ticker", Box::new(ticker))
            .with_process("failing", Box::new(Failing))
            .with_topology(cell_topology(&["ticker", "failing"]));
        let mut compartment = Compartment::new(composite, CompartmentOptions::default()).unwrap();
        let err = compartment.update(1.0).unwrap_err();
        assert!(matches!(
            err,
            CompartmentError::Process {
                source: InvocationError::Failed { .. }
            }
        ));
        assert_eq!(compartment.store("cell").unwrap().get("mass"), Some(&Value::Int(0)));
        assert!(compartment.stores().values().all(|s| !s.is_prepared()));
        assert_eq!(compartment.local_time(), 0.0);
    }

    #[test]
    fn empty_composite_is_rejected() {
        let err = Compartment::new(Composite::new(), CompartmentOptions::default()).unwrap_err();
        assert!(matches!(err, CompartmentError::Empty));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let composite = Composite::new()
            .with_process("a", Box::new(Failing))
            .with_deriver("a", Box::new(Failing))
            .with_topology(cell_topology(&["a"]));
        let err = Compartment::new(composite, CompartmentOptions::default()).unwrap_err();
        assert!(matches!(err, CompartmentError::DuplicateProcess { .. }));
    }

    #[test]
    fn zero_time_step_is_rejected() {
        let (ticker, _) = Ticker::new(0.0, "mass");
        let composite = Composite::from_process("ticker", Box::new(ticker));
        let err = Compartment::new(composite, CompartmentOptions::default()).unwrap_err();
        assert!(matches!(err, CompartmentError::ProcessTimestep { .. }));
    }

    #[test]
    fn emits_configuration_then_history_each_step() {
        let ram = Rc::new(RefCell::new(RamEmitter::new()));
        let (ticker, _) = Ticker::new(0.5, "mass");
        let composite = Composite::from_process("ticker", Box::new(ticker));
        let options = CompartmentOptions::default()
            .with_agent_id("7")
            .with_emitter(Rc::clone(&ram));
        let mut compartment = Compartment::new(composite, options).unwrap();
        compartment.update(1.0).unwrap();
        compartment.update(1.0).unwrap();

        let ram = ram.borrow();
        let tables: Vec<_> = ram.records().iter().map(|r| r.table).collect();
        assert_eq!(
            tables,
            vec![
                EmitTable::Configuration,
                EmitTable::History,
                EmitTable::History,
                EmitTable::History
            ]
        );
        let config = ram.records().first().unwrap();
        assert_eq!(config.data.get("agent_id"), Some(&Value::from("7")));
        let series = ram.timeseries();
        assert_eq!(series.time, vec![0.0, 1.0, 2.0]);
        assert_eq!(series.numbers("cell", "mass"), vec![0.0, 1.0, 2.0]);
        assert!(!series.stores.contains_key(META_STORE));
    }

    #[test]
    fn meta_store_tracks_time() {
        let (ticker, _) = Ticker::new(1.0, "mass");
        let composite = Composite::from_process("ticker", Box::new(ticker));
        let options = CompartmentOptions::default().with_start_time(SimTime::from_units(3.0).unwrap());
        let mut compartment = Compartment::new(composite, options).unwrap();
        compartment.update(1.5).unwrap();
        assert_eq!(
            compartment.store(META_STORE).unwrap().get(TIME_KEY),
            Some(&Value::Float(4.5))
        );
    }

    #[test]
    fn divide_state_uses_schema_and_skips_meta_store() {
        let (ticker, _) = Ticker::new(1.0, "mass");
        let mut composite = Composite::from_process("ticker", Box::new(ticker));
        let mut initial = InitialState::new();
        initial.insert(
            StoreId::from("cell"),
            [
                ("mass".to_owned(), Value::Float(8.0)),
                ("division".to_owned(), Value::Bool(true)),
            ]
            .into_iter()
            .collect(),
        );
        composite.initial_state = initial;
        let options = CompartmentOptions::default().with_divide_condition(divide_on_flag("cell", "division"));
        let mut compartment = Compartment::new(composite, options).unwrap();
        compartment
            .stores
            .get_mut("cell")
            .unwrap()
            .set_schema_entry("division", SchemaEntry::with_divider(Divider::Zero));

        assert!(compartment.should_divide());
        let [a, b] = compartment.divide_state().unwrap();
        assert!(!a.contains_key(META_STORE));
        let a_cell = a.get("cell").unwrap();
        let b_cell = b.get("cell").unwrap();
        assert_eq!(a_cell.get("mass"), Some(&Value::Float(4.0)));
        assert_eq!(b_cell.get("mass"), Some(&Value::Float(4.0)));
        assert_eq!(a_cell.get("division"), Some(&Value::Int(0)));
    }

    #[test]
    fn divide_hook_replaces_schema_division() {
        let (ticker, _) = Ticker::new(1.0, "mass");
        let composite = Composite::from_process("ticker", Box::new(ticker));
        let hook: DivideHook = Rc::new(|compartment: &Compartment| -> Result<[DaughterState; 2], CompartmentError> {
            let state = compartment.to_dict();
            Ok([state.clone(), state])
        });
        let options = CompartmentOptions::default().with_divide_state(hook);
        let mut compartment = Compartment::new(composite, options).unwrap();
        let [a, _] = compartment.divide_state().unwrap();
        assert!(a.contains_key(META_STORE));
        assert!(!compartment.should_divide());
    }

    proptest! {
        #[test]
        fn every_process_reaches_the_end_of_each_step(
            steps in proptest::collection::vec(0.01_f64..3.0, 1..4),
            external in 0.01_f64..5.0,
        ) {
            let mut composite = Composite::new();
            let mut topology = Topology::new();
            let mut recorders = Vec::new();
            for (index, step) in steps.iter().enumerate() {
                let id = format!("p{index}");
                let key: &'static str = ["a", "b", "c", "d"].get(index).copied().unwrap();
                let (ticker, intervals) = Ticker::new(*step, key);
                topology = topology.with(&id, "cell", "cell");
                composite = composite.with_process(id.as_str(), Box::new(ticker));
                recorders.push((*step, intervals));
            }
            let mut compartment =
                Compartment::new(composite.with_topology(topology), CompartmentOptions::default()).unwrap();
            compartment.update(external).unwrap();

            let external_ticks = SimTime::from_units(external).unwrap();
            for front in compartment.fronts() {
                prop_assert_eq!(SimTime::from_units(front.time).unwrap(), external_ticks);
                prop_assert!(!front.pending);
            }
            for (step, intervals) in recorders {
                let intervals = intervals.borrow();
                let total: f64 = intervals.iter().sum();
                prop_assert!((total - external).abs() < 1e-6);
                prop_assert!(intervals.iter().all(|dt| *dt <= step + 1e-9));
            }
        }
    }
}
