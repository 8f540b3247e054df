//! Process constructors by type name.
//!
//! Configuration refers to processes by a `type` string; the registry maps
//! that string to a constructor taking the raw parameter map.

use std::collections::BTreeMap;

use tracing::debug;
use vivarium_core::{Process, ProcessError};
use vivarium_types::State;

use crate::counter::{self, CounterDecay, CounterParameters};
use crate::divide_threshold::{self, DivideOnThreshold, DivideThresholdParameters};
use crate::error::RegistryError;
use crate::growth::{self, Growth, GrowthParameters};
use crate::parameters::parse;
use crate::transport::{self, Transport, TransportParameters};
use crate::volume::{self, VolumeDeriver, VolumeParameters};

/// Builds one process from its parameter map.
pub type Constructor = fn(&State) -> Result<Box<dyn Process>, RegistryError>;

/// Type name → constructor.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ProcessRegistry {
    /// An empty registry.
    pub const fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// A registry holding every reference process.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(growth::NAME, build_growth);
        registry.register(divide_threshold::NAME, build_divide_threshold);
        registry.register(volume::NAME, build_volume);
        registry.register(counter::NAME, build_counter);
        registry.register(transport::NAME, build_transport);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, constructor: Constructor) {
        let name = name.into();
        if self.constructors.insert(name.clone(), constructor).is_some() {
            debug!(process_type = %name, "replaced process constructor");
        }
    }

    /// Whether `kind` is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Construct a process of type `kind`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownType`] when `kind` is not registered, or
    /// whatever the constructor reports for bad parameters.
    pub fn build(&self, kind: &str, parameters: &State) -> Result<Box<dyn Process>, RegistryError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownType {
                kind: kind.to_owned(),
                known: self.names().collect::<Vec<_>>().join(", "),
            })?;
        constructor(parameters)
    }
}

fn rejected(kind: &str) -> impl FnOnce(ProcessError) -> RegistryError + '_ {
    move |source| RegistryError::Process {
        kind: kind.to_owned(),
        source,
    }
}

fn build_growth(parameters: &State) -> Result<Box<dyn Process>, RegistryError> {
    let parameters: GrowthParameters = parse(growth::NAME, parameters)?;
    let process = Growth::new(parameters).map_err(rejected(growth::NAME))?;
    Ok(Box::new(process))
}

fn build_divide_threshold(parameters: &State) -> Result<Box<dyn Process>, RegistryError> {
    let parameters: DivideThresholdParameters = parse(divide_threshold::NAME, parameters)?;
    Ok(Box::new(DivideOnThreshold::new(parameters)))
}

fn build_volume(parameters: &State) -> Result<Box<dyn Process>, RegistryError> {
    let parameters: VolumeParameters = parse(volume::NAME, parameters)?;
    let process = VolumeDeriver::new(parameters).map_err(rejected(volume::NAME))?;
    Ok(Box::new(process))
}

fn build_counter(parameters: &State) -> Result<Box<dyn Process>, RegistryError> {
    let parameters: CounterParameters = parse(counter::NAME, parameters)?;
    let process = CounterDecay::new(parameters).map_err(rejected(counter::NAME))?;
    Ok(Box::new(process))
}

fn build_transport(parameters: &State) -> Result<Box<dyn Process>, RegistryError> {
    let parameters: TransportParameters = parse(transport::NAME, parameters)?;
    let process = Transport::new(parameters).map_err(rejected(transport::NAME))?;
    Ok(Box::new(process))
}
