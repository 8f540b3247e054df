//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup and the run itself.

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: vivarium_core::config::ConfigError,
    },

    /// The composite configuration did not validate.
    #[error("composite error: {source}")]
    Composer {
        /// The underlying composer error.
        #[from]
        source: vivarium_processes::ComposerError,
    },

    /// Building or running the colony failed.
    #[error("colony error: {source}")]
    Colony {
        /// The underlying colony error.
        #[from]
        source: vivarium_core::ColonyError,
    },
}
