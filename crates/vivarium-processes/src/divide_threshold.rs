//! Raise a division flag once a quantity crosses a threshold.

use serde::Deserialize;
use vivarium_core::process::read_number;
use vivarium_core::schema::{Schema, SchemaEntry};
use vivarium_core::{Divider, Ports, PortStates, Process, ProcessError, ProcessSettings, Update, Updater};
use vivarium_types::{PortName, State, Value};

/// Registry name.
pub const NAME: &str = "divide_threshold";

/// Port carrying both the watched quantity and the flag.
pub const PORT: &str = "global";

/// Parameters of [`DivideOnThreshold`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DivideThresholdParameters {
    /// Value at or above which the flag is raised (default: 2000.0).
    pub threshold: f64,
    /// Key being watched (default: `mass`).
    pub variable: String,
    /// Flag key (default: `division`).
    pub flag: String,
}

impl Default for DivideThresholdParameters {
    fn default() -> Self {
        Self {
            threshold: 2000.0,
            variable: "mass".to_owned(),
            flag: "division".to_owned(),
        }
    }
}

/// Sets `flag` to 1 while `variable >= threshold`, 0 otherwise.
///
/// The flag uses the `set` updater and the `zero` divider, so daughters
/// start with a lowered flag.
#[derive(Debug, Clone)]
pub struct DivideOnThreshold {
    parameters: DivideThresholdParameters,
}

impl DivideOnThreshold {
    /// Create the process.
    pub const fn new(parameters: DivideThresholdParameters) -> Self {
        Self { parameters }
    }
}

impl Process for DivideOnThreshold {
    fn ports(&self) -> Ports {
        let mut ports = Ports::new();
        ports.insert(
            PortName::from(PORT),
            vec![self.parameters.variable.clone(), self.parameters.flag.clone()],
        );
        ports
    }

    fn default_settings(&self) -> ProcessSettings {
        let mut state = State::new();
        state.insert(self.parameters.flag.clone(), Value::Int(0));
        let mut schema = Schema::new();
        schema.insert(
            self.parameters.flag.clone(),
            SchemaEntry {
                updater: Updater::Set,
                divider: Divider::Zero,
            },
        );

        let mut settings = ProcessSettings::default();
        settings.state.insert(PortName::from(PORT), state);
        settings.schema.insert(PortName::from(PORT), schema);
        settings
    }

    fn next_update(&mut self, _timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
        let value = read_number(states, PORT, &self.parameters.variable)?;
        let flag = i64::from(value >= self.parameters.threshold);
        let mut values = State::new();
        values.insert(self.parameters.flag.clone(), Value::Int(flag));
        let mut update = Update::new();
        update.insert(PortName::from(PORT), values);
        Ok(update)
    }
}
