//! Colonies of compartments that divide.
//!
//! A [`Colony`] holds every living compartment keyed by [`AgentId`] and
//! advances them together. When a compartment's divide condition holds
//! after a step, the colony splits its state, asks the [`Composer`] for two
//! fresh composites seeded with the daughter states, and replaces the
//! parent with daughters named `<id>0` and `<id>1`. Daughters inherit the
//! parent's simulated time, divide rules, and emitter; their division RNG
//! is seeded from the parent's.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info};
use vivarium_types::{AgentId, EmitRecord, EmitTable, ExperimentId, PhylogenyRecord, RecordError};

use crate::clock::{ClockError, SimTime};
use crate::compartment::{
    Compartment, CompartmentError, CompartmentOptions, DaughterState, DivideCondition, DivideHook,
};
use crate::composite::{ComposeError, Composer, InitialState};
use crate::emitter::{Emitter, SharedEmitter};
use crate::runner::{SimulationEndReason, SimulationResult, SimulationSettings};

/// Errors raised while running a colony.
#[derive(Debug, thiserror::Error)]
pub enum ColonyError {
    /// A compartment failed.
    #[error("agent `{agent_id}`: {source}")]
    Compartment {
        /// The failing agent.
        agent_id: AgentId,
        /// The underlying compartment error.
        source: CompartmentError,
    },

    /// The composer could not build a compartment.
    #[error("failed to compose agent `{agent_id}`: {source}")]
    Compose {
        /// The agent being built.
        agent_id: AgentId,
        /// The underlying composer error.
        source: ComposeError,
    },

    /// No living compartment has this id.
    #[error("agent `{agent_id}` is not part of the colony")]
    UnknownAgent {
        /// The missing id.
        agent_id: AgentId,
    },

    /// A daughter id is already taken.
    #[error("agent `{agent_id}` already exists")]
    DuplicateAgent {
        /// The clashing id.
        agent_id: AgentId,
    },

    /// A phylogeny record could not be built.
    #[error("record error: {source}")]
    Record {
        /// The underlying record error.
        #[from]
        source: RecordError,
    },

    /// The run length was invalid.
    #[error("invalid run length: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },
}

/// How a colony builds and divides its compartments.
pub struct ColonyOptions {
    /// Experiment every compartment belongs to.
    pub experiment_id: ExperimentId,
    /// Id of the founding compartment.
    pub founder: AgentId,
    /// Seed for the founder's division RNG.
    pub seed: u64,
    /// Sink shared by every compartment.
    pub emitter: SharedEmitter,
    /// Divide condition installed on every compartment.
    pub divide_condition: Option<DivideCondition>,
    /// Divide-state hook installed on every compartment.
    pub divide_state: Option<DivideHook>,
    /// Reject conflicting process defaults.
    pub strict_defaults: bool,
    /// Stop dividing once this many agents are alive.
    pub max_agents: Option<usize>,
}

impl core::fmt::Debug for ColonyOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ColonyOptions")
            .field("experiment_id", &self.experiment_id)
            .field("founder", &self.founder)
            .field("seed", &self.seed)
            .field("strict_defaults", &self.strict_defaults)
            .field("max_agents", &self.max_agents)
            .finish_non_exhaustive()
    }
}

/// A growing population of compartments built by one composer.
pub struct Colony<C> {
    composer: C,
    experiment_id: ExperimentId,
    emitter: SharedEmitter,
    divide_condition: Option<DivideCondition>,
    divide_state: Option<DivideHook>,
    strict_defaults: bool,
    max_agents: Option<usize>,
    agents: BTreeMap<AgentId, Compartment>,
    divisions: u64,
}

impl<C: Composer> Colony<C> {
    /// Build the founding compartment from the composer's defaults.
    pub fn new(composer: C, options: ColonyOptions) -> Result<Self, ColonyError> {
        let mut colony = Self {
            composer,
            experiment_id: options.experiment_id,
            emitter: options.emitter,
            divide_condition: options.divide_condition,
            divide_state: options.divide_state,
            strict_defaults: options.strict_defaults,
            max_agents: options.max_agents,
            agents: BTreeMap::new(),
            divisions: 0,
        };
        let founder = colony.build(options.founder.clone(), &InitialState::new(), options.seed, SimTime::ZERO)?;
        colony.agents.insert(options.founder, founder);
        Ok(colony)
    }

    fn build(
        &self,
        agent_id: AgentId,
        initial_state: &InitialState,
        seed: u64,
        start_time: SimTime,
    ) -> Result<Compartment, ColonyError> {
        let composite = self
            .composer
            .generate(initial_state)
            .map_err(|source| ColonyError::Compose {
                agent_id: agent_id.clone(),
                source,
            })?;
        let mut options = CompartmentOptions::default()
            .with_agent_id(agent_id.clone())
            .with_experiment_id(self.experiment_id)
            .with_seed(seed)
            .with_start_time(start_time)
            .with_emitter(Rc::clone(&self.emitter));
        options.divide_condition.clone_from(&self.divide_condition);
        options.divide_state.clone_from(&self.divide_state);
        options.strict_defaults = self.strict_defaults;
        Compartment::new(composite, options).map_err(|source| ColonyError::Compartment { agent_id, source })
    }

    /// Advance every compartment by `timestep` ticks, then divide those
    /// whose condition holds.
    ///
    /// Returns the number of divisions performed.
    ///
    /// Compartments advance one at a time in id order. If one fails, that
    /// compartment keeps its last committed batch, those before it have
    /// already advanced, and those after it have not: agents may then
    /// disagree on their local time.
    pub fn advance(&mut self, timestep: SimTime) -> Result<usize, ColonyError> {
        for (agent_id, compartment) in &mut self.agents {
            compartment
                .advance(timestep)
                .map_err(|source| ColonyError::Compartment {
                    agent_id: agent_id.clone(),
                    source,
                })?;
        }

        let dividing: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|(_, compartment)| compartment.should_divide())
            .map(|(id, _)| id.clone())
            .collect();
        let mut divided = 0_usize;
        for agent_id in dividing {
            if self.at_capacity() {
                debug!(agents = self.agents.len(), "agent limit reached, skipping division");
                break;
            }
            self.divide(&agent_id)?;
            divided = divided.saturating_add(1);
        }
        Ok(divided)
    }

    /// Advance every compartment by `timestep` time units.
    pub fn update(&mut self, timestep: f64) -> Result<usize, ColonyError> {
        self.advance(SimTime::from_units(timestep)?)
    }

    /// Replace one compartment with its two daughters.
    ///
    /// Both daughters are built before the parent is removed, so a failed
    /// division leaves the colony as it was.
    pub fn divide(&mut self, agent_id: &AgentId) -> Result<[AgentId; 2], ColonyError> {
        if !self.agents.contains_key(agent_id) {
            return Err(ColonyError::UnknownAgent {
                agent_id: agent_id.clone(),
            });
        }
        let daughters = agent_id.daughters();
        for daughter in &daughters {
            if self.agents.contains_key(daughter) {
                return Err(ColonyError::DuplicateAgent {
                    agent_id: daughter.clone(),
                });
            }
        }

        let parent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| ColonyError::UnknownAgent {
                agent_id: agent_id.clone(),
            })?;
        let states: [DaughterState; 2] = parent.divide_state().map_err(|source| ColonyError::Compartment {
            agent_id: agent_id.clone(),
            source,
        })?;
        let start_time = parent.local_ticks();
        let time = parent.local_time();
        let seeds = [parent.next_seed(), parent.next_seed()];

        let mut built = Vec::with_capacity(daughters.len());
        for ((daughter, state), seed) in daughters.iter().zip(states).zip(seeds) {
            let compartment = self.build(daughter.clone(), &state, seed, start_time)?;
            built.push((daughter.clone(), compartment));
        }
        let record = EmitRecord::from_serializable(
            EmitTable::Phylogeny,
            &PhylogenyRecord {
                experiment_id: self.experiment_id,
                parent: agent_id.clone(),
                daughters: daughters.clone(),
                time,
            },
        )?;

        self.agents.remove(agent_id);
        self.agents.extend(built);
        self.emitter.emit(record);
        self.divisions = self.divisions.saturating_add(1);
        let [first, second] = &daughters;
        info!(
            parent = %agent_id,
            %first,
            %second,
            time,
            "agent divided"
        );
        Ok(daughters)
    }

    /// Run for `settings.total_time`, dividing as conditions fire.
    pub fn run(&mut self, settings: &SimulationSettings) -> Result<SimulationResult, ColonyError> {
        info!(
            agents = self.agents.len(),
            total_time = settings.total_time,
            timestep = settings.timestep,
            "colony starting"
        );
        let mut total_steps = 0_u64;
        let mut end_reason = SimulationEndReason::TotalTimeReached;
        for step in settings.steps()? {
            self.advance(step)?;
            total_steps = total_steps.saturating_add(1);
            if self.at_capacity() && self.agents.values().any(Compartment::should_divide) {
                end_reason = SimulationEndReason::AgentLimitReached;
                break;
            }
        }
        let result = SimulationResult {
            end_reason,
            final_time: self.time(),
            total_steps,
        };
        info!(
            reason = ?result.end_reason,
            agents = self.agents.len(),
            divisions = self.divisions,
            final_time = result.final_time,
            "colony finished"
        );
        Ok(result)
    }

    fn at_capacity(&self) -> bool {
        self.max_agents.is_some_and(|max| self.agents.len() >= max)
    }

    /// Living compartments by id.
    pub const fn agents(&self) -> &BTreeMap<AgentId, Compartment> {
        &self.agents
    }

    /// One compartment.
    pub fn agent(&self, agent_id: &str) -> Option<&Compartment> {
        self.agents.get(agent_id)
    }

    /// Number of divisions so far.
    pub const fn divisions(&self) -> u64 {
        self.divisions
    }

    /// Simulated time of the colony; every agent shares it.
    pub fn time(&self) -> f64 {
        self.agents
            .values()
            .map(Compartment::local_time)
            .reduce(f64::max)
            .unwrap_or_default()
    }
}

impl<C> core::fmt::Debug for Colony<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Colony")
            .field("experiment_id", &self.experiment_id)
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("divisions", &self.divisions)
            .finish_non_exhaustive()
    }
}
