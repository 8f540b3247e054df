//! Error types for the vivarium-processes crate.

use vivarium_core::ProcessError;
use vivarium_types::{PortName, ProcessId};

/// Errors raised while looking up or constructing processes by name.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No constructor is registered under this type name.
    #[error("unknown process type `{kind}` (known types: {known})")]
    UnknownType {
        /// The requested type name.
        kind: String,
        /// Comma-separated list of registered names.
        known: String,
    },

    /// The parameters did not match the process's parameter struct.
    #[error("invalid parameters for process type `{kind}`: {source}")]
    InvalidParameters {
        /// The process type.
        kind: String,
        /// The underlying deserialization error.
        source: serde_json::Error,
    },

    /// The process rejected its parameters.
    #[error("process type `{kind}` rejected its parameters: {source}")]
    Process {
        /// The process type.
        kind: String,
        /// The underlying process error.
        source: ProcessError,
    },
}

/// Errors raised while validating a configured composite.
#[derive(Debug, thiserror::Error)]
pub enum ComposerError {
    /// A process could not be built from its configuration.
    #[error("cannot build process `{process}`: {source}")]
    Build {
        /// The configured process id.
        process: ProcessId,
        /// The registry error.
        source: RegistryError,
    },

    /// Two processes share an id.
    #[error("process id `{process}` is configured more than once")]
    DuplicateProcess {
        /// The repeated id.
        process: ProcessId,
    },

    /// A declared port has no topology entry.
    #[error("port `{port}` of process `{process}` has no topology entry")]
    UnmappedPort {
        /// The process.
        process: ProcessId,
        /// The unmapped port.
        port: PortName,
    },
}
