//! End-to-end runs of the reference processes through compartments and
//! colonies.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use std::cell::RefCell;
use std::rc::Rc;

use vivarium_core::composite::InitialState;
use vivarium_core::config::SimulationConfig;
use vivarium_core::topology::Topology;
use vivarium_core::{
    Colony, ColonyOptions, Compartment, CompartmentOptions, Composer, Composite, NullEmitter, RamEmitter,
    SharedEmitter, SimulationEndReason, SimulationSettings, divide_on_flag, simulate_compartment,
};
use vivarium_processes::{ConfiguredComposer, ProcessRegistry};
use vivarium_types::{AgentId, ExperimentId, State, StoreId, Value};

fn parameters(pairs: &[(&str, Value)]) -> State {
    pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

fn number(compartment: &Compartment, store: &str, key: &str) -> f64 {
    compartment
        .store(store)
        .and_then(|s| s.get(key))
        .and_then(Value::as_f64)
        .unwrap()
}

const DIVIDING_CELL: &str = r"
experiment:
  name: dividing-cell
  seed: 7
  total_time: 10.0
  timestep: 1.0
  emitter: ram
  divide_on: { store: cell, key: division }
composite:
  processes:
    - id: growth
      type: growth
      parameters: { rate: 0.1 }
    - id: decay
      type: counter_decay
      parameters: { amount: 1, initial: 101 }
    - id: divide
      type: divide_threshold
      parameters: { threshold: 200.0 }
      deriver: true
    - id: volume
      type: volume
      parameters: { density: 2.0 }
      deriver: true
  topology:
    growth: { global: cell }
    decay: { counts: cell }
    divide: { global: cell }
    volume: { global: cell }
  initial_state:
    cell: { mass: 100.0 }
";

fn dividing_colony(
    config: &SimulationConfig,
    emitter: SharedEmitter,
) -> Colony<ConfiguredComposer> {
    let composer = ConfiguredComposer::new(ProcessRegistry::with_builtins(), config.composite.clone()).unwrap();
    let flag = config.experiment.divide_on.clone().unwrap();
    let options = ColonyOptions {
        experiment_id: ExperimentId::new(),
        founder: AgentId::from("1"),
        seed: config.experiment.seed,
        emitter,
        divide_condition: Some(divide_on_flag(flag.store, flag.key)),
        divide_state: None,
        strict_defaults: config.experiment.strict_defaults,
        max_agents: config.experiment.max_agents,
    };
    Colony::new(composer, options).unwrap()
}

#[test]
fn processes_at_different_rates_share_one_compartment() {
    let registry = ProcessRegistry::with_builtins();
    let growth = registry
        .build("growth", &parameters(&[("rate", Value::Float(0.1)), ("initial", Value::Float(100.0))]))
        .unwrap();
    let transport = registry
        .build("transport", &parameters(&[("rate", Value::Float(1.0)), ("time_step", Value::Float(0.1))]))
        .unwrap();
    let composite = Composite::new()
        .with_process("growth", growth)
        .with_process("transport", transport)
        .with_topology(
            Topology::new()
                .with("growth", "global", "cell")
                .with("transport", "external", "environment")
                .with("transport", "internal", "cell"),
        );

    let ram = Rc::new(RefCell::new(RamEmitter::new()));
    let options = CompartmentOptions::default().with_emitter(Rc::clone(&ram));
    let mut compartment = Compartment::new(composite, options).unwrap();
    let result = simulate_compartment(&mut compartment, &SimulationSettings::new(5.0, 1.0)).unwrap();

    assert_eq!(result.end_reason, SimulationEndReason::TotalTimeReached);
    assert_eq!(compartment.local_time(), 5.0);
    assert!((number(&compartment, "cell", "mass") - 100.0 * 0.5_f64.exp()).abs() < 1e-9);
    assert!((number(&compartment, "cell", "glucose") - 5.0).abs() < 1e-9);
    assert!((number(&compartment, "environment", "glucose") - 5.0).abs() < 1e-9);
    // One history record per external step plus the initial one.
    assert_eq!(ram.borrow().timeseries().time.len(), 6);
}

#[test]
fn one_long_step_runs_each_counter_at_its_own_cadence() {
    let registry = ProcessRegistry::with_builtins();
    let counter = |time_step: f64| {
        registry
            .build(
                "counter_decay",
                &parameters(&[
                    ("amount", Value::Int(1)),
                    ("initial", Value::Int(100)),
                    ("time_step", Value::Float(time_step)),
                ]),
            )
            .unwrap()
    };
    let composite = Composite::new()
        .with_process("fast", counter(0.1))
        .with_process("slow", counter(1.0))
        .with_topology(
            Topology::new()
                .with("fast", "counts", "fast_counts")
                .with("slow", "counts", "slow_counts"),
        );
    let mut compartment =
        Compartment::new(composite, CompartmentOptions::default().with_emitter(NullEmitter)).unwrap();

    compartment.update(5.0).unwrap();

    // One decrement per call: 50 calls at 0.1 and 5 calls at 1.0.
    assert_eq!(compartment.local_time(), 5.0);
    assert_eq!(compartment.store("fast_counts").and_then(|s| s.get("count")), Some(&Value::Int(50)));
    assert_eq!(compartment.store("slow_counts").and_then(|s| s.get("count")), Some(&Value::Int(95)));
}

#[test]
fn growth_matches_the_closed_form_after_ten_units() {
    let registry = ProcessRegistry::with_builtins();
    let growth = registry
        .build("growth", &parameters(&[("rate", Value::Float(0.1)), ("initial", Value::Float(100.0))]))
        .unwrap();
    let composite = Composite::from_process("growth", growth);
    let mut compartment =
        Compartment::new(composite, CompartmentOptions::default().with_emitter(NullEmitter)).unwrap();
    simulate_compartment(&mut compartment, &SimulationSettings::new(10.0, 1.0)).unwrap();
    let mass = number(&compartment, "global", "mass");
    assert!((mass - 100.0 * 1.0_f64.exp()).abs() < 1e-6);
}

#[test]
fn division_halves_mass_and_lowers_the_flag() {
    let config = SimulationConfig::parse(DIVIDING_CELL).unwrap();
    let ram = Rc::new(RefCell::new(RamEmitter::new()));
    let mut colony = dividing_colony(&config, Rc::clone(&ram) as SharedEmitter);

    // 100 * e^0.6 < 200 <= 100 * e^0.7
    for _ in 0..6 {
        assert_eq!(colony.update(1.0).unwrap(), 0);
    }
    assert_eq!(colony.update(1.0).unwrap(), 1);

    let ids: Vec<_> = colony.agents().keys().map(AgentId::as_str).collect();
    assert_eq!(ids, vec!["10", "11"]);
    let parent_mass = 100.0 * 0.7_f64.exp();
    let mut total_mass = 0.0;
    let mut total_count = 0.0;
    for daughter in colony.agents().values() {
        total_mass += number(daughter, "cell", "mass");
        total_count += number(daughter, "cell", "count");
        assert_eq!(
            daughter.store("cell").and_then(|s| s.get("division")),
            Some(&Value::Int(0))
        );
        assert_eq!(daughter.local_time(), 7.0);
    }
    assert!((total_mass - parent_mass).abs() < 1e-9);
    // 101 - 7 decrements, split between the daughters.
    assert_eq!(total_count, 94.0);

    // The deriver recomputes volume from each daughter's own mass.
    colony.update(1.0).unwrap();
    for daughter in colony.agents().values() {
        let expected = number(daughter, "cell", "mass") / 2.0;
        assert!((number(daughter, "cell", "volume") - expected).abs() < 1e-12);
    }
    assert_eq!(colony.divisions(), 1);
}

#[test]
fn seeded_colonies_replay_identically() {
    let config = SimulationConfig::parse(DIVIDING_CELL).unwrap();
    let settings = config.simulation_settings();

    let run = || {
        let mut colony = dividing_colony(&config, Rc::new(RefCell::new(NullEmitter)) as SharedEmitter);
        colony.run(&settings).unwrap();
        colony
            .agents()
            .iter()
            .map(|(id, agent)| (id.clone(), agent.to_dict()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn set_updates_follow_declaration_order() {
    let registry = ProcessRegistry::with_builtins();
    let build = |threshold: f64| {
        registry
            .build("divide_threshold", &parameters(&[("threshold", Value::Float(threshold))]))
            .unwrap()
    };
    let mut initial = InitialState::new();
    initial.insert(StoreId::from("cell"), parameters(&[("mass", Value::Float(150.0))]));

    let final_flag = |first: (&str, f64), second: (&str, f64)| {
        let composite = Composite::new()
            .with_process(first.0, build(first.1))
            .with_process(second.0, build(second.1))
            .with_topology(
                Topology::new()
                    .with(first.0, "global", "cell")
                    .with(second.0, "global", "cell"),
            )
            .with_initial_state(initial.clone());
        let mut compartment =
            Compartment::new(composite, CompartmentOptions::default().with_emitter(NullEmitter)).unwrap();
        compartment.update(1.0).unwrap();
        compartment.store("cell").and_then(|s| s.get("division")).cloned()
    };

    // Below 150 raises the flag, above 150 lowers it; the later process wins.
    let low_then_high = final_flag(("low", 100.0), ("high", 200.0));
    let high_then_low = final_flag(("high", 200.0), ("low", 100.0));
    assert_eq!(low_then_high, Some(Value::Int(0)));
    assert_eq!(high_then_low, Some(Value::Int(1)));
    for _ in 0..3 {
        assert_eq!(final_flag(("low", 100.0), ("high", 200.0)), low_then_high);
    }
}

#[test]
fn agent_limit_stops_the_colony() {
    let yaml = DIVIDING_CELL.replace("emitter: ram", "emitter: null\n  max_agents: 1");
    let config = SimulationConfig::parse(&yaml).unwrap();
    let mut colony = dividing_colony(&config, Rc::new(RefCell::new(NullEmitter)) as SharedEmitter);
    let result = colony.run(&config.simulation_settings()).unwrap();
    assert_eq!(result.end_reason, SimulationEndReason::AgentLimitReached);
    assert_eq!(colony.agents().len(), 1);
    assert_eq!(result.final_time, 7.0);
}

#[test]
fn composer_builds_fresh_processes_each_time() {
    let config = SimulationConfig::parse(DIVIDING_CELL).unwrap();
    let composer = ConfiguredComposer::new(ProcessRegistry::with_builtins(), config.composite).unwrap();
    let first = composer.generate(&InitialState::new()).unwrap();
    let second = composer.generate(&InitialState::new()).unwrap();
    assert_eq!(first.process_ids(), second.process_ids());
    assert_eq!(first.len(), 4);
}
