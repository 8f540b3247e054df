//! Strongly-typed identifiers.
//!
//! Processes, stores, ports, and agents are addressed by human-readable
//! names that come straight from topology configuration, so they wrap a
//! [`String`]. Experiments get a UUID v7 so that runs sort by start time.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

/// Generates a newtype wrapper around a [`String`] name.
///
/// Name types borrow as `str` so maps keyed by them can be queried with
/// string literals.
macro_rules! define_name {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[serde(transparent)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Create a name from anything string-like.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl core::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

define_id! {
    /// Unique identifier for one experiment run.
    ExperimentId
}

define_name! {
    /// Name of a process within a compartment (a topology key).
    ProcessId
}

define_name! {
    /// Name of a store within a compartment.
    StoreId
}

define_name! {
    /// Name of a port declared by a process.
    PortName
}

define_name! {
    /// Lineage name of a compartment in a colony.
    ///
    /// Daughters append `0` or `1` to the parent's name, so the name
    /// alone encodes the full ancestry.
    AgentId
}

impl AgentId {
    /// Return the names of this agent's two daughters.
    pub fn daughters(&self) -> [Self; 2] {
        [Self(format!("{}0", self.0)), Self(format!("{}1", self.0))]
    }
}
