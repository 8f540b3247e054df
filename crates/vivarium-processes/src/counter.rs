//! Fixed-amount decrement of an integer count.

use serde::Deserialize;
use vivarium_core::{Ports, PortStates, Process, ProcessError, ProcessSettings, Update};
use vivarium_types::{PortName, State, Value};

/// Registry name.
pub const NAME: &str = "counter_decay";

/// Port carrying the count.
pub const PORT: &str = "counts";

/// Parameters of [`CounterDecay`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterParameters {
    /// Key being decremented (default: `count`).
    pub key: String,
    /// Amount removed per call (default: 1).
    pub amount: i64,
    /// Default starting count (default: 100).
    pub initial: i64,
    /// Preferred cadence (default: 1.0).
    pub time_step: f64,
}

impl Default for CounterParameters {
    fn default() -> Self {
        Self {
            key: "count".to_owned(),
            amount: 1,
            initial: 100,
            time_step: 1.0,
        }
    }
}

/// Decrements an accumulated integer by `amount` each call, never below zero.
#[derive(Debug, Clone)]
pub struct CounterDecay {
    parameters: CounterParameters,
}

impl CounterDecay {
    /// Create the process. `amount` must not be negative.
    pub fn new(parameters: CounterParameters) -> Result<Self, ProcessError> {
        if parameters.amount < 0 {
            return Err(ProcessError::InvalidParameter {
                name: "amount".to_owned(),
                reason: format!("must not be negative, got {}", parameters.amount),
            });
        }
        Ok(Self { parameters })
    }
}

impl Process for CounterDecay {
    fn ports(&self) -> Ports {
        let mut ports = Ports::new();
        ports.insert(PortName::from(PORT), vec![self.parameters.key.clone()]);
        ports
    }

    fn default_settings(&self) -> ProcessSettings {
        let mut state = State::new();
        state.insert(self.parameters.key.clone(), Value::Int(self.parameters.initial));
        let mut settings = ProcessSettings {
            time_step: self.parameters.time_step,
            ..ProcessSettings::default()
        };
        settings.state.insert(PortName::from(PORT), state);
        settings
    }

    fn next_update(&mut self, _timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
        let key = &self.parameters.key;
        let Some(Value::Int(current)) = states.get(PORT).and_then(|s| s.get(key)) else {
            return Err(ProcessError::MissingInput {
                port: PORT.to_owned(),
                key: key.clone(),
            });
        };
        let delta = self.parameters.amount.min((*current).max(0));
        let mut values = State::new();
        values.insert(key.clone(), Value::Int(delta.saturating_neg()));
        let mut update = Update::new();
        update.insert(PortName::from(PORT), values);
        Ok(update)
    }
}
