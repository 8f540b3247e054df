//! Volume derived from mass and a fixed density.

use serde::Deserialize;
use vivarium_core::process::{ports_from, read_number};
use vivarium_core::schema::{Schema, SchemaEntry};
use vivarium_core::{Divider, Ports, PortStates, Process, ProcessError, ProcessSettings, Update, Updater};
use vivarium_types::{PortName, State, Value};

/// Registry name.
pub const NAME: &str = "volume";

/// Port carrying mass and volume.
pub const PORT: &str = "global";

/// Parameters of [`VolumeDeriver`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeParameters {
    /// Mass per unit volume (default: 1100.0).
    pub density: f64,
}

impl Default for VolumeParameters {
    fn default() -> Self {
        Self { density: 1100.0 }
    }
}

/// Sets `volume = mass / density`.
///
/// Meant to run as a deriver, so `volume` always matches the committed mass.
#[derive(Debug, Clone)]
pub struct VolumeDeriver {
    density: f64,
}

impl VolumeDeriver {
    /// Create the deriver. Density must be positive.
    pub fn new(parameters: VolumeParameters) -> Result<Self, ProcessError> {
        if parameters.density.is_nan() || parameters.density <= 0.0 {
            return Err(ProcessError::InvalidParameter {
                name: "density".to_owned(),
                reason: format!("must be positive, got {}", parameters.density),
            });
        }
        Ok(Self {
            density: parameters.density,
        })
    }
}

impl Process for VolumeDeriver {
    fn ports(&self) -> Ports {
        ports_from(&[(PORT, &["mass", "volume"])])
    }

    fn default_settings(&self) -> ProcessSettings {
        let mut state = State::new();
        state.insert("volume".to_owned(), Value::Float(0.0));
        let mut schema = Schema::new();
        // Daughters get their volume recomputed from their own mass.
        schema.insert(
            "volume".to_owned(),
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
        let mass = read_number(states, PORT, "mass")?;
        let mut values = State::new();
        values.insert("volume".to_owned(), Value::Float(mass / self.density));
        let mut update = Update::new();
        update.insert(PortName::from(PORT), values);
        Ok(update)
    }
}
