//! Command-line runner for the Vivarium simulation engine.
//!
//! Loads configuration, builds a colony from the configured composite,
//! and runs it until the total time elapses or the agent limit is hit.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `vivarium-config.yaml` (or the path given as
//!    the first argument), applying environment overrides
//! 2. Initialize structured logging (tracing)
//! 3. Validate the composite against the process registry
//! 4. Build the emitter and the founding compartment
//! 5. Run the colony
//! 6. Log the result

mod error;

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use vivarium_core::config::{LogFormat, LoggingConfig, SimulationConfig};
use vivarium_core::runner::log_simulation_end;
use vivarium_core::{Colony, ColonyOptions, EmitterKind, RamEmitter, SharedEmitter, divide_on_flag};
use vivarium_processes::{ConfiguredComposer, ProcessRegistry};
use vivarium_types::{AgentId, EmitTable, ExperimentId};

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const CONFIG_FILE: &str = "vivarium-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, composition, or the run fails.
fn main() -> Result<(), EngineError> {
    // 1. Load configuration.
    let path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_FILE), PathBuf::from);
    let config = SimulationConfig::load_or_default(&path)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config = %path.display(),
        experiment = config.experiment.name,
        seed = config.experiment.seed,
        total_time = config.experiment.total_time,
        timestep = config.experiment.timestep,
        "vivarium-engine starting"
    );

    // 3. Validate the composite.
    let registry = ProcessRegistry::with_builtins();
    info!(
        process_types = registry.names().collect::<Vec<_>>().join(", "),
        "process registry loaded"
    );
    let composer = ConfiguredComposer::new(registry, config.composite.clone())?;

    // 4. Build the emitter and the colony.
    let ram = Rc::new(RefCell::new(RamEmitter::new()));
    let emitter: SharedEmitter = match config.experiment.emitter {
        EmitterKind::Ram => Rc::clone(&ram) as SharedEmitter,
        kind => Rc::new(RefCell::new(kind.build())) as SharedEmitter,
    };
    let experiment_id = ExperimentId::new();
    let options = ColonyOptions {
        experiment_id,
        founder: AgentId::from("0"),
        seed: config.experiment.seed,
        emitter,
        divide_condition: config
            .experiment
            .divide_on
            .clone()
            .map(|flag| divide_on_flag(flag.store, flag.key)),
        divide_state: None,
        strict_defaults: config.experiment.strict_defaults,
        max_agents: config.experiment.max_agents,
    };
    let mut colony = Colony::new(composer, options)?;
    info!(%experiment_id, "colony founded");

    // 5. Run.
    let result = colony.run(&config.simulation_settings())?;

    // 6. Log results.
    log_simulation_end(&result);
    if config.experiment.emitter == EmitterKind::Ram {
        let ram = ram.borrow();
        info!(
            history = ram.table(EmitTable::History).count(),
            phylogeny = ram.table(EmitTable::Phylogeny).count(),
            "records held in memory"
        );
    }
    info!(
        agents = colony.agents().len(),
        divisions = colony.divisions(),
        final_time = result.final_time,
        "vivarium-engine shutdown complete"
    );
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
