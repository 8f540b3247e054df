//! Simulation runners.
//!
//! [`simulate_compartment`] drives one compartment through `total_time`
//! in external steps of `timestep`, stopping early when its divide
//! condition fires. [`simulate_process`] wraps a lone process in a
//! compartment, wiring each port to a store of the same name, and returns
//! the emitted history as a [`Timeseries`].
//!
//! The last step is shortened so the run ends exactly on `total_time`.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::info;
use vivarium_types::ProcessId;

use crate::clock::{ClockError, SimTime};
use crate::compartment::{Compartment, CompartmentError, CompartmentOptions};
use crate::composite::Composite;
use crate::emitter::{RamEmitter, Timeseries};
use crate::process::Process;

/// Errors that can occur during a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// `total_time` or `timestep` is invalid.
    #[error("invalid run length: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// The compartment failed to build or update.
    #[error("compartment error: {source}")]
    Compartment {
        /// The underlying compartment error.
        #[from]
        source: CompartmentError,
    },
}

/// How long to run and how far each external step goes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Total simulated time to run for.
    pub total_time: f64,
    /// Length of each external step.
    pub timestep: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            total_time: 10.0,
            timestep: 1.0,
        }
    }
}

impl SimulationSettings {
    /// Settings for `total_time` in steps of `timestep`.
    pub const fn new(total_time: f64, timestep: f64) -> Self {
        Self { total_time, timestep }
    }

    /// The external steps of this run, in ticks.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError`] if either length is invalid.
    pub fn steps(&self) -> Result<Steps, ClockError> {
        Ok(Steps {
            remaining: SimTime::from_units(self.total_time)?,
            step: SimTime::timestep(self.timestep)?,
        })
    }
}

/// Iterator over external step lengths; the last one may be short.
#[derive(Debug, Clone, Copy)]
pub struct Steps {
    remaining: SimTime,
    step: SimTime,
}

impl Iterator for Steps {
    type Item = SimTime;

    fn next(&mut self) -> Option<SimTime> {
        if self.remaining == SimTime::ZERO {
            return None;
        }
        let step = self.step.min(self.remaining);
        self.remaining = self.remaining.saturating_sub(step);
        Some(step)
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationEndReason {
    /// The full `total_time` elapsed.
    TotalTimeReached,
    /// The compartment's divide condition fired.
    Division,
    /// A colony reached its configured agent limit.
    AgentLimitReached,
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    /// Why the run stopped.
    pub end_reason: SimulationEndReason,
    /// Simulated time at the end of the run.
    pub final_time: f64,
    /// Number of external steps taken.
    pub total_steps: u64,
}

/// Callback invoked after each external step.
pub trait StepCallback {
    /// Called after the compartment finished a step.
    fn on_step(&mut self, compartment: &Compartment);
}

/// A callback that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCallback;

impl StepCallback for NoOpCallback {
    fn on_step(&mut self, _compartment: &Compartment) {}
}

/// Run a compartment for `settings.total_time` or until it should divide.
pub fn simulate_compartment(
    compartment: &mut Compartment,
    settings: &SimulationSettings,
) -> Result<SimulationResult, RunnerError> {
    simulate_compartment_with(compartment, settings, &mut NoOpCallback)
}

/// [`simulate_compartment`] with a per-step callback.
pub fn simulate_compartment_with(
    compartment: &mut Compartment,
    settings: &SimulationSettings,
    callback: &mut dyn StepCallback,
) -> Result<SimulationResult, RunnerError> {
    info!(
        agent_id = %compartment.agent_id(),
        total_time = settings.total_time,
        timestep = settings.timestep,
        "simulation starting"
    );
    let mut total_steps = 0_u64;
    let mut end_reason = SimulationEndReason::TotalTimeReached;
    for step in settings.steps()? {
        compartment.advance(step)?;
        total_steps = total_steps.saturating_add(1);
        callback.on_step(compartment);
        if compartment.should_divide() {
            info!(agent_id = %compartment.agent_id(), time = compartment.local_time(), "divide condition met");
            end_reason = SimulationEndReason::Division;
            break;
        }
    }
    let result = SimulationResult {
        end_reason,
        final_time: compartment.local_time(),
        total_steps,
    };
    log_simulation_end(&result);
    Ok(result)
}

/// Outcome of [`simulate_process`].
#[derive(Debug, Clone)]
pub struct ProcessSimulation {
    /// How the run ended.
    pub result: SimulationResult,
    /// Emitted history, one series per store key.
    pub timeseries: Timeseries,
}

/// Run one process on its own, each port wired to a same-named store.
pub fn simulate_process(
    id: impl Into<ProcessId>,
    process: Box<dyn Process>,
    settings: &SimulationSettings,
) -> Result<ProcessSimulation, RunnerError> {
    let ram = Rc::new(RefCell::new(RamEmitter::new()));
    let composite = Composite::from_process(id, process);
    let options = CompartmentOptions::default().with_emitter(Rc::clone(&ram));
    let mut compartment = Compartment::new(composite, options)?;
    let result = simulate_compartment(&mut compartment, settings)?;
    let timeseries = ram.borrow().timeseries();
    Ok(ProcessSimulation { result, timeseries })
}

/// Log the end of a run.
pub fn log_simulation_end(result: &SimulationResult) {
    info!(
        reason = ?result.end_reason,
        final_time = result.final_time,
        total_steps = result.total_steps,
        "simulation ended"
    );
}
