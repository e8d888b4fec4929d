use std::sync::Arc;

use anyhow::{anyhow, Result};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use evocore::core::candidate::{Candidate, Structure};
use evocore::engine::evaluator::{EvalContext, FitnessFunction};
use evocore::engine::normalize::NormalizationPipeline;
use evocore::engine::operators::{Crossover, Initializer, Mutation};
use evocore::engine::refiner::IdentityRefiner;
use evocore::engine::registry::{GATools, InitStrategy, StrategyRegistry};
use evocore::engine::selection::Tournament;

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// --- Construction helpers ---

pub fn structure(key: &str, value: f64) -> Structure {
    Structure::new(key, json!({ "value": value }))
}

/// An unevaluated candidate carrying `value` in its opaque payload.
pub fn candidate(key: &str, value: f64) -> Candidate {
    Candidate::new(structure(key, value), 0, "Test")
}

/// A candidate with raw and scaled fitness already assigned.
pub fn scored(key: &str, raw: Vec<f64>, scaled: f64) -> Candidate {
    let value = raw.first().copied().unwrap_or(0.0);
    let mut c = candidate(key, value);
    c.set_raw_fitness(raw);
    c.set_scaled_fitness(scaled);
    c
}

/// A candidate whose evaluation failed.
pub fn failed(key: &str) -> Candidate {
    let mut c = candidate(key, 0.0);
    c.mark_evaluation_failed();
    c
}

// --- Mock strategies ---

/// Seeds `size` structures keyed "seed-0".."seed-N" with ascending values.
pub struct CountingInitializer;

impl Initializer for CountingInitializer {
    fn name(&self) -> &str {
        "counting"
    }

    fn seed_structures(&self, size: usize, _rng: &mut ChaCha8Rng) -> Result<Vec<Structure>> {
        Ok((0..size)
            .map(|i| structure(&format!("seed-{}", i), i as f64))
            .collect())
    }
}

/// Seeds fewer structures than asked for; used to provoke the
/// population-size invariant.
pub struct ShortInitializer {
    pub produce: usize,
}

impl Initializer for ShortInitializer {
    fn name(&self) -> &str {
        "short"
    }

    fn seed_structures(&self, _size: usize, _rng: &mut ChaCha8Rng) -> Result<Vec<Structure>> {
        Ok((0..self.produce)
            .map(|i| structure(&format!("short-{}", i), i as f64))
            .collect())
    }
}

/// Fitness is the single `value` component stored in the payload.
pub struct ValueFitness;

impl FitnessFunction for ValueFitness {
    fn name(&self) -> &str {
        "value"
    }

    fn fitness(&self, candidate: &Candidate, _ctx: &EvalContext) -> Result<Vec<f64>> {
        let value = candidate
            .structure
            .blob
            .get("value")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("payload has no numeric `value`"))?;
        Ok(vec![value])
    }
}

/// Averages the parents' values; child keys are fresh rng-derived
/// fingerprints, so repeated crossovers yield distinct identities.
pub struct BlendCrossover;

impl Crossover for BlendCrossover {
    fn name(&self) -> &str {
        "blend"
    }

    fn cross(&self, a: &Candidate, b: &Candidate, rng: &mut ChaCha8Rng) -> Result<Structure> {
        let va = payload_value(a)?;
        let vb = payload_value(b)?;
        Ok(structure(
            &format!("cx-{:08x}", rng.gen::<u32>()),
            (va + vb) / 2.0,
        ))
    }
}

/// Adds a small jitter to the parent's value under a fresh fingerprint.
pub struct JitterMutation;

impl Mutation for JitterMutation {
    fn name(&self) -> &str {
        "jitter"
    }

    fn mutate(&self, parent: &Candidate, rng: &mut ChaCha8Rng) -> Result<Structure> {
        let value = payload_value(parent)?;
        let jitter = rng.gen_range(-0.5..0.5);
        Ok(structure(
            &format!("mu-{:08x}", rng.gen::<u32>()),
            value + jitter,
        ))
    }
}

fn payload_value(c: &Candidate) -> Result<f64> {
    c.structure
        .blob
        .get("value")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| anyhow!("payload has no numeric `value`"))
}

/// A registry with every mock strategy registered under its name, for
/// tests that exercise configuration resolution and full runs.
pub fn mock_registry() -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    registry.register_initializer("counting", |_| Ok(Arc::new(CountingInitializer)));
    registry.register_initializer("short", |params| {
        let produce = params
            .get("produce")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as usize;
        Ok(Arc::new(ShortInitializer { produce }))
    });
    registry.register_fitness("value", |_| Ok(Arc::new(ValueFitness)));
    registry.register_crossover("blend", |_| Ok(Arc::new(BlendCrossover)));
    registry.register_mutation("jitter", |_| Ok(Arc::new(JitterMutation)));
    registry
}

/// A ready-made bundle for tests that construct populations directly.
pub fn mock_tools(seed: u64) -> Arc<GATools> {
    Arc::new(GATools {
        initializer: InitStrategy::Fresh(Arc::new(CountingInitializer)),
        refiner: Arc::new(IdentityRefiner),
        fitness: Arc::new(ValueFitness),
        normalization: NormalizationPipeline::default(),
        crossover: Arc::new(BlendCrossover),
        mutation: Arc::new(JitterMutation),
        mating: Arc::new(Tournament { size: 2 }),
        exit: None,
        seed,
    })
}
