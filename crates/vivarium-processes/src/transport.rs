//! Uptake of a molecule from an external store into an internal one.

use serde::Deserialize;
use vivarium_core::process::read_number;
use vivarium_core::{Ports, PortStates, Process, ProcessError, ProcessSettings, Update};
use vivarium_types::{PortName, State, Value};

/// Registry name.
pub const NAME: &str = "transport";

/// Port of the source store.
pub const EXTERNAL: &str = "external";

/// Port of the destination store.
pub const INTERNAL: &str = "internal";

/// Parameters of [`Transport`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportParameters {
    /// Molecule key, the same on both sides (default: `glucose`).
    pub molecule: String,
    /// Amount moved per time unit (default: 1.0).
    pub rate: f64,
    /// Default external amount (default: 10.0).
    pub external_initial: f64,
    /// Preferred cadence (default: 1.0).
    pub time_step: f64,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            molecule: "glucose".to_owned(),
            rate: 1.0,
            external_initial: 10.0,
            time_step: 1.0,
        }
    }
}

/// Moves `min(rate * dt, external)` of a molecule inward each call.
///
/// Both sides accumulate, so the total across the two stores is conserved.
#[derive(Debug, Clone)]
pub struct Transport {
    parameters: TransportParameters,
}

impl Transport {
    /// Create the process. `rate` must be finite and non-negative.
    pub fn new(parameters: TransportParameters) -> Result<Self, ProcessError> {
        if !parameters.rate.is_finite() || parameters.rate < 0.0 {
            return Err(ProcessError::InvalidParameter {
                name: "rate".to_owned(),
                reason: format!("must be finite and non-negative, got {}", parameters.rate),
            });
        }
        Ok(Self { parameters })
    }
}

impl Process for Transport {
    fn ports(&self) -> Ports {
        let keys = vec![self.parameters.molecule.clone()];
        let mut ports = Ports::new();
        ports.insert(PortName::from(EXTERNAL), keys.clone());
        ports.insert(PortName::from(INTERNAL), keys);
        ports
    }

    fn default_settings(&self) -> ProcessSettings {
        let molecule = &self.parameters.molecule;
        let mut external = State::new();
        external.insert(molecule.clone(), Value::Float(self.parameters.external_initial));
        let mut internal = State::new();
        internal.insert(molecule.clone(), Value::Float(0.0));

        let mut settings = ProcessSettings {
            time_step: self.parameters.time_step,
            ..ProcessSettings::default()
        };
        settings.state.insert(PortName::from(EXTERNAL), external);
        settings.state.insert(PortName::from(INTERNAL), internal);
        settings
    }

    fn next_update(&mut self, timestep: f64, states: &PortStates) -> Result<Update, ProcessError> {
        let molecule = &self.parameters.molecule;
        let available = read_number(states, EXTERNAL, molecule)?.max(0.0);
        let moved = (self.parameters.rate * timestep).min(available);

        let mut outgoing = State::new();
        outgoing.insert(molecule.clone(), Value::Float(-moved));
        let mut incoming = State::new();
        incoming.insert(molecule.clone(), Value::Float(moved));
        let mut update = Update::new();
        update.insert(PortName::from(EXTERNAL), outgoing);
        update.insert(PortName::from(INTERNAL), incoming);
        Ok(update)
    }
}
