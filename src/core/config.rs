use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named strategy plus its free-form parameters.
///
/// Names are resolved against the `StrategyRegistry` exactly once, when the
/// `GATools` bundle is built; unknown names are rejected there, not at
/// first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StrategySpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: serde_json::Value::Null,
        }
    }
}

/// Run configuration, consumed (not owned) by the engine.
///
/// Parsing an input file into this struct is the host's job; the engine
/// only deserializes and validates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Target flattened population size, enforced before variation and
    /// after survivor selection. Fixed by the restored size in restart runs.
    pub pop_size: usize,
    pub num_generations: usize,

    /// Offspring produced per generation via crossover.
    pub num_crossovers: usize,
    /// Mutants produced per generation.
    pub num_mutations: usize,

    pub seed: u64,
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Cooperative per-candidate evaluation deadline; breaches count as
    /// evaluation failures, never as run errors.
    #[serde(default)]
    pub eval_timeout_secs: Option<u64>,

    /// Root of the per-generation directory tree. Owned exclusively by the
    /// orchestrator for the duration of the run.
    pub workdir: PathBuf,

    pub init: StrategySpec,
    #[serde(default = "default_refiner")]
    pub refiner: StrategySpec,
    pub fitness: StrategySpec,
    pub crossover: StrategySpec,
    pub mutation: StrategySpec,
    #[serde(default = "default_mating")]
    pub mating: StrategySpec,

    /// Ordered normalization steps. An empty list falls back to a bare
    /// summing step.
    #[serde(default)]
    pub normalization: Vec<StrategySpec>,

    #[serde(default)]
    pub exit: Option<StrategySpec>,

    /// A prior checkpoint to restore from. Takes precedence over `init`
    /// and fixes `pop_size` to the restored size.
    #[serde(default)]
    pub restart_from: Option<PathBuf>,
}

impl RunConfig {
    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_secs.map(Duration::from_secs)
    }
}

fn default_threads() -> usize {
    4
}

fn default_refiner() -> StrategySpec {
    StrategySpec::named("identity")
}

fn default_mating() -> StrategySpec {
    StrategySpec::named("tournament")
}
