//! Configuration loading and typed config structures for Vivarium.
//!
//! The canonical configuration lives in `vivarium-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty file (or no file) is a valid,
//! if uneventful, experiment.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use vivarium_types::{ProcessId, State, StoreId};

use crate::composite::InitialState;
use crate::emitter::EmitterKind;
use crate::runner::SimulationSettings;
use crate::schema::SchemaConfig;
use crate::topology::Topology;

/// Environment variable overriding `experiment.seed`.
pub const SEED_ENV: &str = "VIVARIUM_SEED";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("environment variable {var}={value:?} is not valid")]
    InvalidEnv {
        /// The variable name.
        var: &'static str,
        /// Its value.
        value: String,
    },

    /// A field holds a value outside its valid range.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration, mirroring `vivarium-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Run-level settings.
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Processes, wiring, schema, and initial state.
    #[serde(default)]
    pub composite: CompositeConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `VIVARIUM_SEED`, when set, overrides `experiment.seed`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// As [`SimulationConfig::from_file`].
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_seed_override(std::env::var(SEED_ENV).ok().as_deref())
    }

    /// Override the seed from a raw string, if one is given.
    pub fn apply_seed_override(&mut self, value: Option<&str>) -> Result<(), ConfigError> {
        let Some(value) = value else {
            return Ok(());
        };
        self.experiment.seed = value.trim().parse().map_err(|_parse_err| ConfigError::InvalidEnv {
            var: SEED_ENV,
            value: value.to_owned(),
        })?;
        Ok(())
    }

    /// Check ranges and uniqueness that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let experiment = &self.experiment;
        if !experiment.total_time.is_finite() || experiment.total_time < 0.0 {
            return Err(invalid("experiment.total_time", "must be a finite, non-negative number"));
        }
        if !experiment.timestep.is_finite() || experiment.timestep <= 0.0 {
            return Err(invalid("experiment.timestep", "must be a finite, positive number"));
        }
        if experiment.max_agents == Some(0) {
            return Err(invalid("experiment.max_agents", "must be at least 1"));
        }
        let mut seen = BTreeSet::new();
        for process in &self.composite.processes {
            if !seen.insert(&process.id) {
                return Err(invalid(
                    "composite.processes",
                    &format!("process id `{}` appears more than once", process.id),
                ));
            }
        }
        Ok(())
    }

    /// Run length and step taken from `experiment`.
    pub const fn simulation_settings(&self) -> SimulationSettings {
        SimulationSettings::new(self.experiment.total_time, self.experiment.timestep)
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Run-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentConfig {
    /// Human-readable experiment name.
    #[serde(default = "default_experiment_name")]
    pub name: String,

    /// Seed for the founder's division RNG.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Total simulated time.
    #[serde(default = "default_total_time")]
    pub total_time: f64,

    /// External timestep.
    #[serde(default = "default_timestep")]
    pub timestep: f64,

    /// Which emitter records go to.
    #[serde(default)]
    pub emitter: EmitterKind,

    /// Treat conflicting process defaults as an error.
    #[serde(default)]
    pub strict_defaults: bool,

    /// Stop dividing once this many agents are alive.
    #[serde(default)]
    pub max_agents: Option<usize>,

    /// Divide when this store key becomes truthy.
    #[serde(default)]
    pub divide_on: Option<DivideFlag>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: default_experiment_name(),
            seed: default_seed(),
            total_time: default_total_time(),
            timestep: default_timestep(),
            emitter: EmitterKind::default(),
            strict_defaults: false,
            max_agents: None,
            divide_on: None,
        }
    }
}

/// A store key used as a division flag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DivideFlag {
    /// The store holding the flag.
    pub store: StoreId,
    /// The flag key.
    pub key: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// One process in the composite.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessConfig {
    /// Topology key of the process.
    pub id: ProcessId,

    /// Registry name of the process type.
    #[serde(rename = "type")]
    pub kind: String,

    /// Construction parameters.
    #[serde(default)]
    pub parameters: State,

    /// Run as a deriver after every batch.
    #[serde(default)]
    pub deriver: bool,
}

/// Processes, wiring, schema, and initial state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompositeConfig {
    /// Processes in declaration order.
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    /// `{process: {port: store}}`.
    #[serde(default)]
    pub topology: Topology,

    /// `{store: {key: {updater, divide}}}`.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// `{store: {key: value}}`, overwriting process defaults.
    #[serde(default)]
    pub initial_state: InitialState,
}

fn default_experiment_name() -> String {
    "vivarium".to_owned()
}

const fn default_seed() -> u64 {
    0
}

const fn default_total_time() -> f64 {
    10.0
}

const fn default_timestep() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_owned()
}
