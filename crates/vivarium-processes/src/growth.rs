//! Exponential growth of a single quantity.
//!
//! Each call multiplies the quantity by `exp(rate * dt)`. The result is
//! written with the `set` updater, so the process owns the value outright
//! and repeated calls compose exactly into `x0 * exp(rate * t)`.

use serde::Deserialize;
use vivarium_core::process::{read_number, single_update};
use vivarium_core::schema::{Schema, SchemaEntry};
use vivarium_core::{Ports, PortStates, Process, ProcessError, ProcessSettings, Update, Updater};
use vivarium_types::{PortName, State, Value};

/// Registry name.
pub const NAME: &str = "growth";

/// Port the grown quantity lives on.
pub const PORT: &str = "global";

/// Parameters of [`Growth`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrowthParameters {
    /// Growth rate per time unit (default: 0.1).
    pub rate: f64,
    /// Key being grown (default: `mass`).
    pub variable: String,
    /// Default starting value (default: 1.0).
    pub initial: f64,
    /// Preferred cadence (default: 1.0).
    pub time_step: f64,
}

impl Default for GrowthParameters {
    fn default() -> Self {
        Self {
            rate: 0.1,
            variable: "mass".to_owned(),
            initial: 1.0,
            time_step: 1.0,
        }
    }
}

/// Exponential growth.
#[derive(Debug, Clone)]
pub struct Growth {
    parameters: GrowthParameters,
}

impl Growth {
    /// Create the process.
    pub fn new(parameters: GrowthParameters) -> Result<Self, ProcessError> {
        if !parameters.rate.is_finite() {
            return Err(ProcessError::InvalidParameter {
                name: "rate".to_owned(),
                reason: "must be finite".to_owned(),
            });
        }
        Ok(Self { parameters })
    }
}

impl Process for Growth {
    fn ports(&self) -> Ports {
        let mut ports = Ports::new();
        ports.insert(PortName::from(PORT), vec![self.parameters.variable.clone()]);
        ports
    }

    fn default_settings(&self) -> ProcessSettings {
        let variable = self.parameters.variable.clone();
        let mut state = State::new();
        state.insert(variable.clone(), Value::Float(self.parameters.initial));
        let mut schema = Schema::new();
        schema.insert(variable, SchemaEntry::with_updater(Updater::Set));

        let mut settings = ProcessSettings {
            time_step: self.parameters.time_step,
            ..ProcessSettings::default()
        };
        settings.state.insert(PortName::from(PORT), state);
        settings.schema.insert(PortName::from(PORT), schema);
        settings
    }

    fn next_update(&mut self, timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
        let current = read_number(states, PORT, &self.parameters.variable)?;
        let grown = current * (self.parameters.rate * timestep).exp();
        Ok(single_update(PORT, &self.parameters.variable, Value::Float(grown)))
    }
}
