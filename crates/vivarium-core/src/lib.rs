//! Stores, processes, topology wiring, and the compartment scheduler for
//! the Vivarium simulation engine.
//!
//! Processes declare the keys they read and write per port; a topology
//! maps those ports onto shared stores; a compartment advances every
//! process at its own cadence and reconciles their updates into a
//! consistent state after each batch.
//!
//! # Modules
//!
//! - [`updater`] -- How incoming values fold into a key (`accumulate`,
//!   `set`, `merge`, custom)
//! - [`divider`] -- How a key splits between two daughters (`split`,
//!   `split_dict`, `set`, `zero`, custom)
//! - [`schema`] -- Per-key updater/divider entries and their configuration
//! - [`store`] -- Double-buffered, schema-aware state containers
//! - [`process`] -- The [`Process`] trait and snapshot/update plumbing
//! - [`topology`] -- Port → store wiring and store initialisation
//! - [`composite`] -- Process layers plus wiring, and the [`Composer`] trait
//! - [`compartment`] -- The multi-rate scheduler, derivers, and division
//! - [`emitter`] -- Record sinks: null, log, in-memory
//! - [`clock`] -- Integer-tick simulated time
//! - [`runner`] -- Single-compartment and single-process runs
//! - [`colony`] -- Populations of dividing compartments
//! - [`config`] -- Loading `vivarium-config.yaml`
//!
//! [`Process`]: process::Process
//! [`Composer`]: composite::Composer

pub mod clock;
pub mod colony;
pub mod compartment;
pub mod composite;
pub mod config;
pub mod divider;
pub mod emitter;
pub mod process;
pub mod runner;
pub mod schema;
pub mod store;
pub mod topology;
pub mod updater;

pub use colony::{Colony, ColonyError, ColonyOptions};
pub use compartment::{Compartment, CompartmentError, CompartmentOptions, META_STORE, divide_on_flag};
pub use composite::{ComposeError, Composer, Composite};
pub use divider::Divider;
pub use emitter::{Emitter, EmitterKind, LogEmitter, NullEmitter, RamEmitter, SharedEmitter};
pub use process::{Ports, PortStates, Process, ProcessError, ProcessSettings, Update};
pub use runner::{SimulationEndReason, SimulationResult, SimulationSettings, simulate_compartment, simulate_process};
pub use schema::SchemaEntry;
pub use updater::Updater;
