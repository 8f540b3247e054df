//! Emitters: sinks for history, configuration, and phylogeny records.
//!
//! The compartment only ever calls [`Emitter::emit`]. Backends decide what
//! to keep: [`NullEmitter`] drops everything, [`LogEmitter`] writes each
//! record as a structured `tracing` event, and [`RamEmitter`] keeps the
//! full history in memory for inspection and plotting.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vivarium_types::{EmitRecord, EmitTable, StoreId, TIME_KEY, Value};

/// A sink for emitted records.
pub trait Emitter {
    /// Accept one record.
    fn emit(&mut self, record: EmitRecord);
}

/// An emitter several compartments can share.
pub type SharedEmitter = Rc<RefCell<dyn Emitter>>;

impl<E: Emitter + ?Sized> Emitter for Rc<RefCell<E>> {
    fn emit(&mut self, record: EmitRecord) {
        self.borrow_mut().emit(record);
    }
}

impl<E: Emitter + ?Sized> Emitter for Box<E> {
    fn emit(&mut self, record: EmitRecord) {
        (**self).emit(record);
    }
}

/// Which built-in emitter to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmitterKind {
    /// Discard all records.
    Null,
    /// Log records through `tracing`.
    #[default]
    Log,
    /// Keep records in memory.
    Ram,
}

impl EmitterKind {
    /// Build a fresh emitter of this kind.
    pub fn build(self) -> Box<dyn Emitter> {
        match self {
            Self::Null => Box::new(NullEmitter),
            Self::Log => Box::new(LogEmitter),
            Self::Ram => Box::new(RamEmitter::new()),
        }
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl Emitter for NullEmitter {
    fn emit(&mut self, _record: EmitRecord) {}
}

/// Writes every record as an `info!` event with the payload as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmitter;

impl Emitter for LogEmitter {
    fn emit(&mut self, record: EmitRecord) {
        match serde_json::to_string(&record.data) {
            Ok(data) => info!(table = %record.table, data, "emit"),
            Err(e) => warn!(table = %record.table, error = %e, "failed to serialize emitted record"),
        }
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct RamEmitter {
    records: Vec<EmitRecord>,
}

/// History transposed into per-key series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeseries {
    /// Time of each history record.
    pub time: Vec<f64>,
    /// store → key → one value per history record, `Null` where absent.
    pub stores: BTreeMap<StoreId, BTreeMap<String, Vec<Value>>>,
}

impl Timeseries {
    /// The series of one store key.
    pub fn series(&self, store: &str, key: &str) -> Option<&[Value]> {
        self.stores.get(store)?.get(key).map(Vec::as_slice)
    }

    /// The series of one store key as floats; non-numeric entries are skipped.
    pub fn numbers(&self, store: &str, key: &str) -> Vec<f64> {
        self.series(store, key)
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_f64)
            .collect()
    }
}

impl RamEmitter {
    /// An empty emitter.
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Every record, in emission order.
    pub fn records(&self) -> &[EmitRecord] {
        &self.records
    }

    /// Records of one table, in emission order.
    pub fn table(&self, table: EmitTable) -> impl Iterator<Item = &EmitRecord> {
        self.records.iter().filter(move |record| record.table == table)
    }

    /// Transpose the history table into per-store, per-key series.
    pub fn timeseries(&self) -> Timeseries {
        let mut timeseries = Timeseries::default();
        let mut rows = 0_usize;
        for record in self.table(EmitTable::History) {
            timeseries.time.push(record.time().unwrap_or_default());
            for (store, value) in &record.data {
                if store == TIME_KEY {
                    continue;
                }
                let Some(entries) = value.as_map() else {
                    continue;
                };
                let columns = timeseries.stores.entry(StoreId::new(store.as_str())).or_default();
                for (key, value) in entries {
                    let column = columns.entry(key.clone()).or_default();
                    column.resize(rows, Value::Null);
                    column.push(value.clone());
                }
            }
            rows = rows.saturating_add(1);
        }
        for column in timeseries.stores.values_mut().flat_map(BTreeMap::values_mut) {
            column.resize(rows, Value::Null);
        }
        timeseries
    }
}

impl Emitter for RamEmitter {
    fn emit(&mut self, record: EmitRecord) {
        self.records.push(record);
    }
}
