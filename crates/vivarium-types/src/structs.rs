//! Record structs handed to emitters.
//!
//! Emitters receive a table tag plus a plain [`State`] map, so backends
//! never need to know about engine types. The typed records below are
//! converted into that map through `serde_json`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::EmitTable;
use crate::ids::{AgentId, ExperimentId, PortName, ProcessId, StoreId};
use crate::value::{State, Value};

/// Key under which history records carry the simulated time.
pub const TIME_KEY: &str = "time";

/// Errors raised while converting a typed record into an emit record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The record could not be serialized.
    #[error("failed to serialize record: {source}")]
    Serialize {
        /// The underlying serde error.
        #[from]
        source: serde_json::Error,
    },

    /// The record serialized to something other than a map.
    #[error("record must serialize to a map, got {0}")]
    NotAMap(&'static str),
}

/// A single emitted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EmitRecord {
    /// Destination table.
    pub table: EmitTable,
    /// Record payload.
    pub data: State,
}

impl EmitRecord {
    /// Build a `history` record from per-store snapshots at `time`.
    pub fn history(time: f64, stores: BTreeMap<StoreId, State>) -> Self {
        let mut data: State = stores
            .into_iter()
            .map(|(store, state)| (store.0, Value::Map(state)))
            .collect();
        data.insert(TIME_KEY.to_owned(), Value::Float(time));
        Self {
            table: EmitTable::History,
            data,
        }
    }

    /// Build a record for `table` from any serializable struct.
    pub fn from_serializable<T: Serialize>(table: EmitTable, record: &T) -> Result<Self, RecordError> {
        match Value::from(serde_json::to_value(record)?) {
            Value::Map(data) => Ok(Self { table, data }),
            other => Err(RecordError::NotAMap(other.type_name())),
        }
    }

    /// Simulated time carried by a history record, if any.
    pub fn time(&self) -> Option<f64> {
        self.data.get(TIME_KEY).and_then(Value::as_f64)
    }
}

/// Description of a compartment, emitted once when it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ConfigurationRecord {
    /// The experiment this compartment belongs to.
    pub experiment_id: ExperimentId,
    /// The compartment's lineage name.
    pub agent_id: AgentId,
    /// Port wiring of every process.
    pub topology: BTreeMap<ProcessId, BTreeMap<PortName, StoreId>>,
    /// Process declaration order, which fixes batch application order.
    pub process_order: Vec<ProcessId>,
    /// Deriver processes, in the order they run.
    pub derivers: Vec<ProcessId>,
    /// Wall-clock creation time.
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// A division event linking a parent to its two daughters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PhylogenyRecord {
    /// The experiment the division happened in.
    pub experiment_id: ExperimentId,
    /// The dividing compartment.
    pub parent: AgentId,
    /// The two daughter compartments.
    pub daughters: [AgentId; 2],
    /// Simulated time of division.
    pub time: f64,
}
