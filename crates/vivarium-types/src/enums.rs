//! Enumeration types shared across the workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The table an emitted record belongs to.
///
/// Emitter backends route records by table: `history` carries per-step
/// state, `configuration` describes a compartment once at construction,
/// and `phylogeny` links a dividing parent to its daughters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EmitTable {
    /// Timestamped state snapshots.
    History,
    /// One-off compartment description.
    Configuration,
    /// Parent/daughter lineage links.
    Phylogeny,
}

impl EmitTable {
    /// The table name as it appears on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::History => "history",
            Self::Configuration => "configuration",
            Self::Phylogeny => "phylogeny",
        }
    }
}

impl core::fmt::Display for EmitTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
