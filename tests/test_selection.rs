use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use evocore::core::error::EngineError;
use evocore::core::population::Population;
use evocore::engine::normalize::NormalizationPipeline;
use evocore::engine::selection::{
    select_survivors, MatingSelector, RankWeighted, Roulette, Tournament,
};

use crate::common::{mock_tools, scored};

mod common;

#[test]
fn test_survivor_selection_ranked_truncation() {
    let tools = mock_tools(0);
    let pop = Population::with_members(
        "pop",
        vec![
            scored("a", vec![1.0], 1.0),
            scored("b", vec![4.0], 4.0),
            scored("c", vec![2.0], 2.0),
            scored("d", vec![3.0], 3.0),
            scored("e", vec![5.0], 5.0),
        ],
        tools,
    );

    let survivors = select_survivors(&pop, 3).expect("selection failed");
    assert_eq!(survivors.size(), 3);

    let kept: Vec<&str> = survivors
        .flatten()
        .map(|c| c.identity.as_str())
        .collect();
    assert_eq!(kept, vec!["e", "b", "d"]);

    // Every survivor outranks every excluded candidate.
    let min_kept = survivors
        .flatten()
        .map(|c| c.scaled_fitness().unwrap())
        .fold(f64::INFINITY, f64::min);
    for c in pop.flatten() {
        if !kept.contains(&c.identity.as_str()) {
            assert!(c.scaled_fitness().unwrap() <= min_kept);
        }
    }
}

#[test]
fn test_survivor_selection_tie_broken_by_identity() {
    let tools = mock_tools(0);
    let pop = Population::with_members(
        "pop",
        vec![
            scored("zeta", vec![2.0], 2.0),
            scored("alpha", vec![2.0], 2.0),
            scored("mid", vec![1.0], 1.0),
        ],
        tools,
    );

    let survivors = select_survivors(&pop, 2).unwrap();
    let kept: Vec<&str> = survivors
        .flatten()
        .map(|c| c.identity.as_str())
        .collect();
    assert_eq!(kept, vec!["alpha", "zeta"]);
}

#[test]
fn test_survivor_selection_undersized_input_fails_fast() {
    let tools = mock_tools(0);
    let pop = Population::with_members(
        "pop",
        vec![scored("a", vec![1.0], 1.0), scored("b", vec![2.0], 2.0)],
        tools,
    );

    let err = select_survivors(&pop, 5).unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientCandidates {
            needed: 5,
            available: 2
        }
    ));
    // The input snapshot is untouched by the failed attempt.
    assert_eq!(pop.size(), 2);
}

#[test]
fn test_end_to_end_normalize_then_select() {
    // Four candidates, single-component fitness, identity normalization,
    // pop_size 2: the 4.0 and 3.0 candidates must survive.
    let tools = mock_tools(0);
    let members = vec![
        {
            let mut c = common::candidate("r1", 1.0);
            c.set_raw_fitness(vec![1.0]);
            c
        },
        {
            let mut c = common::candidate("r2", 2.0);
            c.set_raw_fitness(vec![2.0]);
            c
        },
        {
            let mut c = common::candidate("r3", 3.0);
            c.set_raw_fitness(vec![3.0]);
            c
        },
        {
            let mut c = common::candidate("r4", 4.0);
            c.set_raw_fitness(vec![4.0]);
            c
        },
    ];
    let pop = Population::with_members("pop", members, tools);

    let normalized = NormalizationPipeline::default().normalize(&pop).unwrap();
    let survivors = select_survivors(&normalized, 2).unwrap();

    let mut raw: Vec<f64> = survivors
        .flatten()
        .map(|c| c.raw_fitness().unwrap()[0])
        .collect();
    raw.sort_by(f64::total_cmp);
    assert_eq!(raw, vec![3.0, 4.0]);
}

#[test]
fn test_failed_candidates_lose_selection_to_succeeded() {
    let tools = mock_tools(0);
    let mut bad = common::candidate("bad", 0.0);
    bad.mark_evaluation_failed();
    let pop = Population::with_members(
        "pop",
        vec![
            {
                let mut c = common::candidate("ok-1", 10.0);
                c.set_raw_fitness(vec![10.0]);
                c
            },
            bad,
            {
                let mut c = common::candidate("ok-2", 20.0);
                c.set_raw_fitness(vec![20.0]);
                c
            },
        ],
        tools,
    );

    let normalized = NormalizationPipeline::default().normalize(&pop).unwrap();
    let survivors = select_survivors(&normalized, 2).unwrap();
    for c in survivors.flatten() {
        assert!(!c.evaluation_failed);
    }
}

// --- Mating selection ---

fn ranked_fixture(tools: &std::sync::Arc<evocore::engine::registry::GATools>) -> Population {
    Population::with_members(
        "pop",
        (0..10)
            .map(|i| scored(&format!("m-{}", i), vec![i as f64], i as f64))
            .collect(),
        tools.clone(),
    )
}

#[test]
fn test_mating_selection_deterministic_for_fixed_seed() {
    let tools = mock_tools(7);
    let pop = ranked_fixture(&tools);
    let ranked = pop.ranked();

    for selector in [
        Box::new(Tournament { size: 3 }) as Box<dyn MatingSelector>,
        Box::new(Roulette),
        Box::new(RankWeighted),
    ] {
        let mut rng_a = ChaCha8Rng::seed_from_u64(42);
        let mut rng_b = ChaCha8Rng::seed_from_u64(42);
        let picks_a = selector.select(&ranked, 8, &mut rng_a);
        let picks_b = selector.select(&ranked, 8, &mut rng_b);
        assert_eq!(
            picks_a, picks_b,
            "`{}` must be deterministic for a fixed seed",
            selector.name()
        );
        assert_eq!(picks_a.len(), 8);
        assert!(picks_a.iter().all(|&i| i < ranked.len()));
    }
}

#[test]
fn test_tournament_prefers_better_ranks() {
    let tools = mock_tools(7);
    let pop = ranked_fixture(&tools);
    let ranked = pop.ranked();

    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let picks = Tournament { size: 4 }.select(&ranked, 200, &mut rng);

    // Rank 0 is the best candidate; a 4-way tournament should pick from
    // the top half far more often than from the bottom half.
    let top = picks.iter().filter(|&&i| i < 5).count();
    assert!(top > 150, "expected top-half dominance, got {}/200", top);
}
