//! Shared type definitions for the Vivarium simulation engine.
//!
//! This crate holds the data vocabulary every other crate speaks: the
//! recursive state [`Value`], typed identifiers, and the records handed to
//! emitters. Types flow downstream to `TypeScript` via `ts-rs` so that
//! history consumers can read emitted records without hand-written
//! bindings.
//!
//! # Modules
//!
//! - [`ids`] -- String-backed names for processes, stores, ports, and
//!   agents, plus UUID experiment ids
//! - [`value`] -- The [`Value`] enum, [`State`] maps, and merge helpers
//! - [`enums`] -- Emit table tags
//! - [`structs`] -- Emit records and typed configuration/phylogeny records

pub mod enums;
pub mod ids;
pub mod structs;
pub mod value;

// Re-export all public types at crate root for convenience.
pub use enums::EmitTable;
pub use ids::{AgentId, ExperimentId, PortName, ProcessId, StoreId};
pub use structs::{ConfigurationRecord, EmitRecord, PhylogenyRecord, RecordError, TIME_KEY};
pub use value::{MAX_MERGE_DEPTH, State, Value, ValueError, fill_gaps, merge_maps};
