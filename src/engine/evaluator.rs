use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};

use crate::core::candidate::Candidate;
use crate::core::population::Population;
use crate::engine::external::reaper::ProcessReaper;

/// Per-call context handed to the fitness strategy.
#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Cooperative deadline: implementations invoking external tools should
    /// stop and return an error once it passes. A breach counts as an
    /// evaluation failure for that candidate, never a run error.
    pub deadline: Option<Instant>,
    pub generation: u64,
}

/// The fitness collaborator.
///
/// Returns the raw fitness components for one candidate. Implementations
/// must be thread-safe; candidates are evaluated concurrently with no
/// shared mutable state beyond the strategy's own configuration.
pub trait FitnessFunction: Send + Sync {
    fn name(&self) -> &str;

    fn fitness(&self, candidate: &Candidate, ctx: &EvalContext) -> Result<Vec<f64>>;

    /// Best-effort teardown of external resources left by earlier calls.
    fn cleanup(&self) {}
}

/// Runs the fitness strategy over a population.
pub struct FitnessEvaluator {
    strategy: Arc<dyn FitnessFunction>,
    timeout: Option<Duration>,
    reaper: Arc<ProcessReaper>,
}

impl FitnessEvaluator {
    pub fn new(
        strategy: Arc<dyn FitnessFunction>,
        timeout: Option<Duration>,
        reaper: Arc<ProcessReaper>,
    ) -> Self {
        Self {
            strategy,
            timeout,
            reaper,
        }
    }

    /// Returns a population in which every candidate either carries a raw
    /// fitness or is flagged `evaluation_failed`.
    ///
    /// Already-scored candidates are left untouched (no redundant
    /// recomputation), and one candidate's failure never blocks the rest.
    pub fn evaluate(&self, population: &Population, generation: u64) -> Population {
        population.map_candidates(|c| {
            if !c.needs_evaluation() {
                return c.clone();
            }
            let ctx = EvalContext {
                deadline: self.timeout.map(|t| Instant::now() + t),
                generation,
            };
            let mut next = c.clone();
            match self.strategy.fitness(c, &ctx) {
                Ok(values) if values.is_empty() => {
                    warn!(
                        "fitness `{}` returned no components for {}; marking failed",
                        self.strategy.name(),
                        c.identity
                    );
                    next.mark_evaluation_failed();
                }
                Ok(values) => {
                    debug!("evaluated {}: {:?}", c.identity, values);
                    next.set_raw_fitness(values);
                }
                Err(e) => {
                    warn!("evaluation of {} failed: {:#}", c.identity, e);
                    next.mark_evaluation_failed();
                }
            }
            next
        })
    }

    /// Resource-cleanup boundary: delegates to the strategy's hook and
    /// reaps any stray external processes. Called at run start, run end,
    /// and before directory publication.
    pub fn cleanup(&self) {
        self.strategy.cleanup();
        self.reaper.kill_stray();
    }
}
