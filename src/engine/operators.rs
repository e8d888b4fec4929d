use anyhow::Result;
use rand_chacha::ChaCha8Rng;

use crate::core::candidate::{Candidate, Structure};
use crate::core::population::Population;

/// Produces the generation-0 structures for a fresh run.
///
/// Implementations are domain collaborators registered with the
/// `StrategyRegistry`; restart runs bypass this and load a checkpoint
/// instead.
pub trait Initializer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `size` seed structures. Keys must already be canonical
    /// fingerprints; the engine wraps them into candidates.
    fn seed_structures(&self, size: usize, rng: &mut ChaCha8Rng) -> Result<Vec<Structure>>;
}

/// Recombines two parents into a child structure.
///
/// A failure is per-pairing: the engine logs it, skips the child and moves
/// on. Returned keys must be fresh fingerprints of the child structure.
pub trait Crossover: Send + Sync {
    fn name(&self) -> &str;

    fn cross(&self, a: &Candidate, b: &Candidate, rng: &mut ChaCha8Rng) -> Result<Structure>;
}

/// Produces a mutated copy of a parent's structure.
pub trait Mutation: Send + Sync {
    fn name(&self) -> &str;

    fn mutate(&self, parent: &Candidate, rng: &mut ChaCha8Rng) -> Result<Structure>;
}

/// Optional early-exit predicate, evaluated once per generation boundary
/// against the freshly selected population. When absent the run always
/// completes all configured generations.
pub trait ExitPredicate: Send + Sync {
    fn name(&self) -> &str;

    fn should_exit(&self, population: &Population) -> bool;
}

// --- Built-ins ---

/// Exits once the best scaled fitness reaches `threshold`.
#[derive(Debug, Clone)]
pub struct TargetFitness {
    pub threshold: f64,
}

impl ExitPredicate for TargetFitness {
    fn name(&self) -> &str {
        "target_fitness"
    }

    fn should_exit(&self, population: &Population) -> bool {
        population
            .best()
            .and_then(|c| c.scaled_fitness())
            .map(|f| f >= self.threshold)
            .unwrap_or(false)
    }
}
