//! A [`Composer`] driven by the `composite` section of the configuration.
//!
//! Every call to [`Composer::generate`] builds a fresh set of processes
//! from the registry, so daughters never share process state with their
//! mother. The configuration is checked once, up front, by building every
//! process and resolving every port.

use std::collections::BTreeSet;

use tracing::info;
use vivarium_core::composite::InitialState;
use vivarium_core::config::CompositeConfig;
use vivarium_core::{ComposeError, Composer, Composite};

use crate::error::ComposerError;
use crate::registry::ProcessRegistry;

/// Builds composites from a registry and a [`CompositeConfig`].
#[derive(Debug, Clone)]
pub struct ConfiguredComposer {
    registry: ProcessRegistry,
    config: CompositeConfig,
}

impl ConfiguredComposer {
    /// Validate `config` against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ComposerError`] for repeated ids, unknown types, rejected
    /// parameters, or ports missing from the topology.
    pub fn new(registry: ProcessRegistry, config: CompositeConfig) -> Result<Self, ComposerError> {
        let mut seen = BTreeSet::new();
        for entry in &config.processes {
            if !seen.insert(entry.id.clone()) {
                return Err(ComposerError::DuplicateProcess {
                    process: entry.id.clone(),
                });
            }
            let process = registry
                .build(&entry.kind, &entry.parameters)
                .map_err(|source| ComposerError::Build {
                    process: entry.id.clone(),
                    source,
                })?;
            for port in process.ports().into_keys() {
                if config.topology.resolve(&entry.id, &port).is_err() {
                    return Err(ComposerError::UnmappedPort {
                        process: entry.id.clone(),
                        port,
                    });
                }
            }
        }

        info!(
            processes = config.processes.len(),
            derivers = config.processes.iter().filter(|p| p.deriver).count(),
            stores = config.topology.stores().len(),
            "composite configuration validated"
        );
        Ok(Self { registry, config })
    }

    /// The validated configuration.
    pub const fn config(&self) -> &CompositeConfig {
        &self.config
    }

    /// Configured initial state with `overrides` laid on top, key by key.
    fn initial_state(&self, overrides: &InitialState) -> InitialState {
        let mut state = self.config.initial_state.clone();
        for (store, values) in overrides {
            let entry = state.entry(store.clone()).or_default();
            entry.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        state
    }
}

impl Composer for ConfiguredComposer {
    fn generate(&self, initial_state: &InitialState) -> Result<Composite, ComposeError> {
        let mut composite = Composite::new()
            .with_topology(self.config.topology.clone())
            .with_schema(self.config.schema.clone())
            .with_initial_state(self.initial_state(initial_state));

        for entry in &self.config.processes {
            let process = self
                .registry
                .build(&entry.kind, &entry.parameters)
                .map_err(|source| ComposeError::Process {
                    process: entry.id.clone(),
                    source: Box::new(source),
                })?;
            composite = if entry.deriver {
                composite.with_deriver(entry.id.clone(), process)
            } else {
                composite.with_process(entry.id.clone(), process)
            };
        }
        Ok(composite)
    }
}
