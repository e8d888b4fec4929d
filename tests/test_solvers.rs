use std::path::Path;

use crossbeam_channel::unbounded;
use serde_json::json;

use evocore::core::config::{RunConfig, StrategySpec};
use evocore::core::error::EngineError;
use evocore::solvers::generational::{run_to_completion, GenerationOrchestrator};
use evocore::solvers::EngineEvent;

use crate::common::{init_test_logging, mock_registry};

mod common;

fn base_config(workdir: &Path) -> RunConfig {
    RunConfig {
        pop_size: 6,
        num_generations: 3,
        num_crossovers: 4,
        num_mutations: 4,
        seed: 11,
        threads: 2,
        eval_timeout_secs: None,
        workdir: workdir.to_path_buf(),
        init: StrategySpec::named("counting"),
        refiner: StrategySpec::named("identity"),
        fitness: StrategySpec::named("value"),
        crossover: StrategySpec::named("blend"),
        mutation: StrategySpec::named("jitter"),
        mating: StrategySpec {
            name: "tournament".to_string(),
            params: json!({ "size": 2 }),
        },
        normalization: vec![StrategySpec::named("sum")],
        exit: None,
        restart_from: None,
    }
}

#[test]
fn test_full_run_flow() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path());

    let tools = mock_registry().resolve(&config).expect("resolve failed");
    let mut orchestrator = GenerationOrchestrator::new(tools, config).unwrap();

    let (tx, rx) = unbounded();
    let final_pop = orchestrator.run(tx).expect("run failed");

    assert_eq!(final_pop.size(), 6);

    let mut finished = false;
    let mut generations_seen = 0;
    let mut new_best_seen = false;
    for msg in rx {
        match msg {
            EngineEvent::Finished => finished = true,
            EngineEvent::GenerationUpdate(stats) => {
                generations_seen += 1;
                assert_eq!(stats.pop_size, 6);
            }
            EngineEvent::NewBest(_) => new_best_seen = true,
            _ => {}
        }
    }
    assert!(finished, "run did not emit Finished");
    assert_eq!(generations_seen, 3);
    assert!(new_best_seen, "run did not report an initial best");

    // Directory layout: initial/ plus one numbered directory per
    // generation, each with selected/ structures and a checkpoint.
    assert!(dir.path().join("initial/pop_dump.json").exists());
    for gen in 1..=3 {
        let selected = dir.path().join(gen.to_string()).join("selected");
        assert!(selected.join("pop_dump.json").exists());
        let structures = std::fs::read_dir(&selected)
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().file_name().to_string_lossy() != "pop_dump.json"
            })
            .count();
        assert_eq!(structures, 6, "one structure file per survivor");
        assert!(dir
            .path()
            .join(gen.to_string())
            .join("preselection_pop_dump.json")
            .exists());
    }

    // Progress: initial snapshot plus one per generation.
    let tracker = orchestrator.progress();
    assert_eq!(tracker.len(), 4);
    assert!(dir.path().join("progress.json").exists());
    assert!(dir.path().join("run.json").exists());
}

#[test]
fn test_exit_predicate_stops_run_early() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    // Mock fitness values are non-negative, so this fires after the
    // first generation's checkpoint.
    config.exit = Some(StrategySpec {
        name: "target_fitness".to_string(),
        params: json!({ "threshold": 0.0 }),
    });

    let tools = mock_registry().resolve(&config).expect("resolve failed");
    let mut orchestrator = GenerationOrchestrator::new(tools, config).unwrap();
    let final_pop = run_to_completion(&mut orchestrator).expect("run failed");

    assert_eq!(final_pop.size(), 6);
    assert!(dir.path().join("initial").is_dir());
    assert!(dir.path().join("1").is_dir());
    assert!(
        !dir.path().join("2").exists(),
        "generation 2 must never begin once the exit predicate fires"
    );
    assert_eq!(orchestrator.progress().len(), 2);
}

#[test]
fn test_population_size_invariant_is_fatal() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    // The initializer under-delivers, so the pre-variation check trips.
    config.init = StrategySpec {
        name: "short".to_string(),
        params: json!({ "produce": 3 }),
    };

    let tools = mock_registry().resolve(&config).expect("resolve failed");
    let mut orchestrator = GenerationOrchestrator::new(tools, config).unwrap();
    let err = run_to_completion(&mut orchestrator).unwrap_err();

    assert!(matches!(
        err,
        EngineError::PopulationSize {
            expected: 6,
            found: 3
        }
    ));
    // The initial checkpoint from before the abort is preserved.
    assert!(dir.path().join("initial/pop_dump.json").exists());
}

#[test]
fn test_restart_fixes_pop_size_to_restored_size() {
    init_test_logging();
    let first_dir = tempfile::tempdir().unwrap();
    let mut config = base_config(first_dir.path());
    config.num_generations = 1;

    let tools = mock_registry().resolve(&config).expect("resolve failed");
    let mut orchestrator = GenerationOrchestrator::new(tools, config).unwrap();
    run_to_completion(&mut orchestrator).expect("first run failed");

    let checkpoint = first_dir.path().join("1/selected/pop_dump.json");
    assert!(checkpoint.exists());

    // Second run restores the checkpoint; its own pop_size setting is
    // overridden by the restored size.
    let second_dir = tempfile::tempdir().unwrap();
    let mut config = base_config(second_dir.path());
    config.pop_size = 40;
    config.num_generations = 2;
    config.restart_from = Some(checkpoint);

    let tools = mock_registry().resolve(&config).expect("resolve failed");
    let mut orchestrator = GenerationOrchestrator::new(tools, config).unwrap();
    let final_pop = run_to_completion(&mut orchestrator).expect("restart run failed");

    assert_eq!(final_pop.size(), 6, "pop_size must follow the restored population");
}

#[test]
fn test_identical_seeds_reproduce_the_run() {
    init_test_logging();
    let run = |seed: u64| {
        let dir = tempfile::tempdir().unwrap();
        let mut config = base_config(dir.path());
        config.seed = seed;
        let tools = mock_registry().resolve(&config).expect("resolve failed");
        let mut orchestrator = GenerationOrchestrator::new(tools, config).unwrap();
        let pop = run_to_completion(&mut orchestrator).expect("run failed");
        let mut ids: Vec<String> = pop.flatten().map(|c| c.identity.0.clone()).collect();
        ids.sort();
        ids
    };

    assert_eq!(run(99), run(99));
}

#[test]
fn test_unknown_strategy_rejected_at_resolve_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.fitness = StrategySpec::named("no_such_fitness");

    let err = mock_registry().resolve(&config).unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnknownStrategy { kind: "fitness", .. }
    ));
}

#[test]
fn test_unknown_normalization_step_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    config.normalization = vec![StrategySpec::named("sigmoid")];

    let err = mock_registry().resolve(&config).unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnknownStrategy {
            kind: "normalization",
            ..
        }
    ));
}
