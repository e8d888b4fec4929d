use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::core::config::{RunConfig, StrategySpec};
use crate::core::error::EngineError;
use crate::engine::evaluator::FitnessFunction;
use crate::engine::normalize::NormalizationPipeline;
use crate::engine::operators::{Crossover, ExitPredicate, Initializer, Mutation, TargetFitness};
use crate::engine::refiner::{IdentityRefiner, StructureRefiner};
use crate::engine::selection::{MatingSelector, RankWeighted, Roulette, Tournament};

/// How generation 0 comes into existence.
pub enum InitStrategy {
    /// Fresh structures from a registered initializer, at the configured
    /// target size.
    Fresh(Arc<dyn Initializer>),
    /// Restore from a prior checkpoint; the restored size fixes `pop_size`
    /// for the remainder of the run.
    Restore(PathBuf),
}

impl fmt::Debug for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::Fresh(i) => write!(f, "Fresh({})", i.name()),
            InitStrategy::Restore(p) => write!(f, "Restore({})", p.display()),
        }
    }
}

/// Immutable bundle of every operator bound to a run.
///
/// Built exactly once from the configuration; shared (via `Arc`) by all
/// population snapshots of the run.
pub struct GATools {
    pub initializer: InitStrategy,
    pub refiner: Arc<dyn StructureRefiner>,
    pub fitness: Arc<dyn FitnessFunction>,
    pub normalization: NormalizationPipeline,
    pub crossover: Arc<dyn Crossover>,
    pub mutation: Arc<dyn Mutation>,
    pub mating: Arc<dyn MatingSelector>,
    pub exit: Option<Arc<dyn ExitPredicate>>,
    pub seed: u64,
}

impl fmt::Debug for GATools {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GATools")
            .field("initializer", &self.initializer)
            .field("refiner", &self.refiner.name())
            .field("fitness", &self.fitness.name())
            .field("normalization", &self.normalization)
            .field("crossover", &self.crossover.name())
            .field("mutation", &self.mutation.name())
            .field("mating", &self.mating.name())
            .field("exit", &self.exit.as_ref().map(|e| e.name().to_string()))
            .field("seed", &self.seed)
            .finish()
    }
}

type BuilderMap<T> = HashMap<String, Box<dyn Fn(&Value) -> Result<Arc<T>> + Send + Sync>>;

/// Explicit name -> builder maps, one per operator kind.
///
/// Domain collaborators (initializer, refiner, fitness, crossover,
/// mutation) are registered by the host; mating policies, the identity
/// refiner and the stock exit predicates ship built in. Unknown names are
/// rejected when the configuration is resolved, never at first use.
pub struct StrategyRegistry {
    initializers: BuilderMap<dyn Initializer>,
    refiners: BuilderMap<dyn StructureRefiner>,
    fitness: BuilderMap<dyn FitnessFunction>,
    crossovers: BuilderMap<dyn Crossover>,
    mutations: BuilderMap<dyn Mutation>,
    matings: BuilderMap<dyn MatingSelector>,
    exits: BuilderMap<dyn ExitPredicate>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            initializers: HashMap::new(),
            refiners: HashMap::new(),
            fitness: HashMap::new(),
            crossovers: HashMap::new(),
            mutations: HashMap::new(),
            matings: HashMap::new(),
            exits: HashMap::new(),
        };

        registry.register_refiner("identity", |_| Ok(Arc::new(IdentityRefiner)));

        registry.register_mating("tournament", |params| {
            #[derive(Deserialize)]
            struct Params {
                #[serde(default = "default_tournament_size")]
                size: usize,
            }
            fn default_tournament_size() -> usize {
                2
            }
            let p: Params = parse_or_default(params, || Params { size: 2 })?;
            Ok(Arc::new(Tournament { size: p.size }))
        });
        registry.register_mating("roulette", |_| Ok(Arc::new(Roulette)));
        registry.register_mating("rank", |_| Ok(Arc::new(RankWeighted)));

        registry.register_exit("target_fitness", |params| {
            #[derive(Deserialize)]
            struct Params {
                threshold: f64,
            }
            let p: Params = parse(params)?;
            Ok(Arc::new(TargetFitness {
                threshold: p.threshold,
            }))
        });

        registry
    }

    // --- Registration ---

    pub fn register_initializer<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Initializer>> + Send + Sync + 'static,
    {
        self.initializers.insert(name.to_string(), Box::new(builder));
    }

    pub fn register_refiner<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn StructureRefiner>> + Send + Sync + 'static,
    {
        self.refiners.insert(name.to_string(), Box::new(builder));
    }

    pub fn register_fitness<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn FitnessFunction>> + Send + Sync + 'static,
    {
        self.fitness.insert(name.to_string(), Box::new(builder));
    }

    pub fn register_crossover<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Crossover>> + Send + Sync + 'static,
    {
        self.crossovers.insert(name.to_string(), Box::new(builder));
    }

    pub fn register_mutation<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Mutation>> + Send + Sync + 'static,
    {
        self.mutations.insert(name.to_string(), Box::new(builder));
    }

    pub fn register_mating<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn MatingSelector>> + Send + Sync + 'static,
    {
        self.matings.insert(name.to_string(), Box::new(builder));
    }

    pub fn register_exit<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn ExitPredicate>> + Send + Sync + 'static,
    {
        self.exits.insert(name.to_string(), Box::new(builder));
    }

    // --- Resolution ---

    /// Resolves the configuration into the immutable `GATools` bundle.
    /// Every name is looked up here, once; a typo'd strategy aborts before
    /// any expensive work starts.
    pub fn resolve(&self, config: &RunConfig) -> Result<Arc<GATools>, EngineError> {
        let initializer = if let Some(path) = &config.restart_from {
            InitStrategy::Restore(path.clone())
        } else if config.init.name == "load" {
            #[derive(Deserialize)]
            struct LoadParams {
                path: PathBuf,
            }
            let p: LoadParams =
                parse(&config.init.params).map_err(|source| EngineError::StrategyParams {
                    kind: "init",
                    name: "load".to_string(),
                    source,
                })?;
            InitStrategy::Restore(p.path)
        } else {
            InitStrategy::Fresh(build(&self.initializers, "init", &config.init)?)
        };

        Ok(Arc::new(GATools {
            initializer,
            refiner: build(&self.refiners, "refiner", &config.refiner)?,
            fitness: build(&self.fitness, "fitness", &config.fitness)?,
            normalization: resolve_normalization(&config.normalization)?,
            crossover: build(&self.crossovers, "crossover", &config.crossover)?,
            mutation: build(&self.mutations, "mutation", &config.mutation)?,
            mating: build(&self.matings, "mating", &config.mating)?,
            exit: match &config.exit {
                Some(spec) => Some(build(&self.exits, "exit", spec)?),
                None => None,
            },
            seed: config.seed,
        }))
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn build<T: ?Sized>(
    map: &BuilderMap<T>,
    kind: &'static str,
    spec: &StrategySpec,
) -> Result<Arc<T>, EngineError> {
    let builder = map.get(&spec.name).ok_or_else(|| EngineError::UnknownStrategy {
        kind,
        name: spec.name.clone(),
    })?;
    builder(&spec.params).map_err(|source| EngineError::StrategyParams {
        kind,
        name: spec.name.clone(),
        source,
    })
}

fn resolve_normalization(specs: &[StrategySpec]) -> Result<NormalizationPipeline, EngineError> {
    if specs.is_empty() {
        return Ok(NormalizationPipeline::default());
    }
    let mut pipeline = NormalizationPipeline::new();
    for spec in specs {
        pipeline = match spec.name.as_str() {
            "power" => {
                #[derive(Deserialize)]
                struct Params {
                    exponent: f64,
                }
                let p: Params = parse(&spec.params).map_err(|source| {
                    EngineError::StrategyParams {
                        kind: "normalization",
                        name: spec.name.clone(),
                        source,
                    }
                })?;
                pipeline.power(p.exponent)
            }
            "multiply" => {
                #[derive(Deserialize)]
                struct Params {
                    coefficients: Vec<f64>,
                }
                let p: Params = parse(&spec.params).map_err(|source| {
                    EngineError::StrategyParams {
                        kind: "normalization",
                        name: spec.name.clone(),
                        source,
                    }
                })?;
                pipeline.multiply(p.coefficients)
            }
            "divide_by_mean" => pipeline.divide_by_mean(),
            "shift_up" => pipeline.shift_up(),
            "sum" => pipeline.sum(),
            other => {
                return Err(EngineError::UnknownStrategy {
                    kind: "normalization",
                    name: other.to_string(),
                })
            }
        };
    }
    Ok(pipeline)
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T> {
    Ok(serde_json::from_value(params.clone())?)
}

fn parse_or_default<T: DeserializeOwned>(params: &Value, default: impl FnOnce() -> T) -> Result<T> {
    if params.is_null() {
        Ok(default())
    } else {
        parse(params)
    }
}
