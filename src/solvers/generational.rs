use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use log::{info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::progress::ProgressTracker;
use crate::core::candidate::Candidate;
use crate::core::config::RunConfig;
use crate::core::error::EngineError;
use crate::core::io;
use crate::core::population::Population;
use crate::engine::evaluator::FitnessEvaluator;
use crate::engine::external::reaper::ProcessReaper;
use crate::engine::refiner::RefinementPass;
use crate::engine::registry::{GATools, InitStrategy};
use crate::engine::selection::select_survivors;
use crate::solvers::{EngineEvent, GenStats};

// --- Constants ---

const PROGRESS_FILE: &str = "progress.json";
const RUN_FILE: &str = "run.json";
const POP_DUMP: &str = "pop_dump.json";
const PRESELECTION_DUMP: &str = "preselection_pop_dump.json";

/// Drives one run of the generational state machine:
/// INIT -> OPTIMIZE -> EVALUATE -> NORMALIZE, then per generation
/// VARY -> MERGE_DEDUP -> RE_OPTIMIZE -> RE_EVALUATE -> RE_NORMALIZE ->
/// SELECT -> CHECKPOINT -> EXIT_CHECK, until the exit predicate fires or
/// the configured number of generations completes.
///
/// Stage results are always fresh population snapshots; the previous
/// snapshot stays intact until replaced, and the last checkpoint survives
/// a fatal abort.
pub struct GenerationOrchestrator {
    tools: Arc<GATools>,
    config: RunConfig,
    refiner: RefinementPass,
    evaluator: FitnessEvaluator,
    tracker: ProgressTracker,
    pool: rayon::ThreadPool,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    config: &'a RunConfig,
}

impl GenerationOrchestrator {
    pub fn new(tools: Arc<GATools>, config: RunConfig) -> Result<Self, EngineError> {
        let reaper = Arc::new(ProcessReaper::new());
        let refiner = RefinementPass::new(tools.refiner.clone());
        let evaluator =
            FitnessEvaluator::new(tools.fitness.clone(), config.eval_timeout(), reaper);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .map_err(|e| EngineError::Init { source: e.into() })?;

        Ok(Self {
            tools,
            config,
            refiner,
            evaluator,
            tracker: ProgressTracker::new(),
            pool,
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Runs the full state machine, returning the terminal population.
    ///
    /// Per-candidate failures are folded into the population along the
    /// way; only invariant violations and unrecoverable persistence errors
    /// abort the run.
    pub fn run(&mut self, tx: Sender<EngineEvent>) -> Result<Population, EngineError> {
        // Stray tools from an interrupted previous run could hold handles
        // inside the workdir.
        self.cleanup();

        let workdir = self.config.workdir.clone();
        fs::create_dir_all(&workdir)?;
        io::write_json_atomic(
            &workdir.join(RUN_FILE),
            &RunMetadata {
                run_id: self.run_id,
                started_at: self.started_at,
                config: &self.config,
            },
        )?;
        info!("run {} starting in {}", self.run_id, workdir.display());

        // INIT
        let _ = tx.send(EngineEvent::Log("Initializing population".to_string()));
        let initial_dir = workdir.join("initial");
        fs::create_dir_all(&initial_dir)?;
        let (mut pop, pop_size, resumed) = self.initialize()?;
        pop.write(&initial_dir)?;

        // First pass: OPTIMIZE -> EVALUATE -> NORMALIZE
        pop = self.refine_evaluate_normalize(&pop, 0)?;
        pop.dump(&initial_dir.join(POP_DUMP))?;
        if !resumed {
            self.tracker.update(&pop);
        }
        self.tracker.dump(&workdir.join(PROGRESS_FILE))?;

        let mut best_seen = pop.best().and_then(|c| c.scaled_fitness());
        if let Some(best) = pop.best() {
            let _ = tx.send(EngineEvent::NewBest(best.clone()));
        }

        // Evolution loop. A restored progress file fixes the starting
        // generation; a fresh run starts at 1.
        let start_gen = self.tracker.len().max(1);
        for gen in start_gen..=self.config.num_generations {
            // Invariant: exact population size before variation. A
            // mismatch is fatal and non-retryable.
            let found = pop.size();
            if found != pop_size {
                return Err(EngineError::PopulationSize {
                    expected: pop_size,
                    found,
                });
            }

            let _ = tx.send(EngineEvent::Log(format!(
                "Generation {} of {}",
                gen, self.config.num_generations
            )));
            let gen_dir = workdir.join(gen.to_string());
            fs::create_dir_all(&gen_dir)?;
            let mut rng = ChaCha8Rng::seed_from_u64(self.tools.seed ^ gen as u64);

            // VARY
            let offspring = self.gen_offspring(&pop, gen as u64, &mut rng);
            let mutants = self.gen_mutants(&pop, gen as u64, &mut rng);

            // MERGE_DEDUP
            let merged = pop.merge(&offspring).merge(&mutants);
            let before = merged.size();
            let merged = merged.deduplicate();
            let duplicates_removed = before - merged.size();
            merged.dump(&gen_dir.join(PRESELECTION_DUMP))?;

            // RE_OPTIMIZE -> RE_EVALUATE -> RE_NORMALIZE. Scored members
            // are reused; normalization statistics are always recomputed
            // over the merged population.
            let merged = self.refine_evaluate_normalize(&merged, gen as u64)?;

            // SELECT
            let survivors = select_survivors(&merged, pop_size)?;
            let found = survivors.size();
            if found != pop_size {
                return Err(EngineError::PopulationSize {
                    expected: pop_size,
                    found,
                });
            }
            pop = survivors;

            // CHECKPOINT. Cleanup first: a stray external process holding
            // a handle under the generation directory would block
            // publication.
            self.cleanup();
            let selected_dir = gen_dir.join("selected");
            pop.write(&selected_dir)?;
            pop.dump(&selected_dir.join(POP_DUMP))?;
            self.tracker.update(&pop);
            self.tracker.dump(&workdir.join(PROGRESS_FILE))?;

            // Telemetry
            let stats = gen_stats(&pop, gen, duplicates_removed);
            if let Some(best) = pop.best() {
                let improved = match (best.scaled_fitness(), best_seen) {
                    (Some(b), Some(seen)) => b > seen,
                    (Some(_), None) => true,
                    _ => false,
                };
                if improved {
                    best_seen = best.scaled_fitness();
                    let _ = tx.send(EngineEvent::NewBest(best.clone()));
                }
            }
            let _ = tx.send(EngineEvent::GenerationUpdate(stats));

            // EXIT_CHECK
            if let Some(exit) = &self.tools.exit {
                if exit.should_exit(&pop) {
                    info!(
                        "exit predicate `{}` satisfied after generation {}",
                        exit.name(),
                        gen
                    );
                    let _ = tx.send(EngineEvent::Log(format!(
                        "Exit criterion met after generation {}",
                        gen
                    )));
                    break;
                }
            }
        }

        // Run-end boundary: reap before the host archives or moves the
        // output directory.
        self.cleanup();
        let _ = tx.send(EngineEvent::Finished);
        Ok(pop)
    }

    // --- Stages ---

    fn initialize(&mut self) -> Result<(Population, usize, bool), EngineError> {
        match &self.tools.initializer {
            InitStrategy::Restore(path) => {
                info!("restoring population from {}", path.display());
                let pop = Population::load(path, self.tools.clone())?;
                let pop_size = pop.size();
                let progress_path = self.config.workdir.join(PROGRESS_FILE);
                let resumed = if progress_path.exists() {
                    self.tracker = ProgressTracker::load(&progress_path)?;
                    !self.tracker.is_empty()
                } else {
                    false
                };
                info!(
                    "restored {} candidates; pop_size fixed to {}",
                    pop_size, pop_size
                );
                Ok((pop, pop_size, resumed))
            }
            InitStrategy::Fresh(init) => {
                info!(
                    "generating initial population of {} via `{}`",
                    self.config.pop_size,
                    init.name()
                );
                let mut rng = ChaCha8Rng::seed_from_u64(self.tools.seed);
                let structures = init
                    .seed_structures(self.config.pop_size, &mut rng)
                    .map_err(|source| EngineError::Init { source })?;
                let members: Vec<Candidate> = structures
                    .into_iter()
                    .map(|s| Candidate::new(s, 0, "Initial"))
                    .collect();
                let pop = Population::with_members("generation_0", members, self.tools.clone());
                Ok((pop, self.config.pop_size, false))
            }
        }
    }

    fn refine_evaluate_normalize(
        &self,
        pop: &Population,
        generation: u64,
    ) -> Result<Population, EngineError> {
        info!("optimizing structures");
        let pop = self.pool.install(|| self.refiner.run(pop));
        info!("calculating member fitness");
        let pop = self.pool.install(|| self.evaluator.evaluate(&pop, generation));
        info!("normalizing fitness values");
        self.tools.normalization.normalize(&pop)
    }

    fn gen_offspring(
        &self,
        pop: &Population,
        generation: u64,
        rng: &mut ChaCha8Rng,
    ) -> Population {
        let ranked = pop.ranked();
        let mut members = Vec::with_capacity(self.config.num_crossovers);
        for _ in 0..self.config.num_crossovers {
            let picks = self.tools.mating.select(&ranked, 2, rng);
            let &[i, j] = picks.as_slice() else {
                warn!(
                    "mating selector `{}` returned {} parents, expected 2; skipping crossover",
                    self.tools.mating.name(),
                    picks.len()
                );
                continue;
            };
            let (a, b) = (ranked[i], ranked[j]);
            match self.tools.crossover.cross(a, b, rng) {
                Ok(structure) => members.push(Candidate::offspring(
                    structure,
                    generation,
                    vec![a.identity.clone(), b.identity.clone()],
                )),
                Err(e) => warn!("crossover failed: {:#}", e),
            }
        }
        Population::with_members("offspring", members, pop.tools().clone())
    }

    fn gen_mutants(&self, pop: &Population, generation: u64, rng: &mut ChaCha8Rng) -> Population {
        let ranked = pop.ranked();
        let mut members = Vec::with_capacity(self.config.num_mutations);
        for _ in 0..self.config.num_mutations {
            let picks = self.tools.mating.select(&ranked, 1, rng);
            let Some(&i) = picks.first() else {
                warn!(
                    "mating selector `{}` returned no parent; skipping mutation",
                    self.tools.mating.name()
                );
                continue;
            };
            let parent = ranked[i];
            match self.tools.mutation.mutate(parent, rng) {
                Ok(structure) => members.push(Candidate::mutant(
                    structure,
                    generation,
                    parent.identity.clone(),
                )),
                Err(e) => warn!("mutation failed: {:#}", e),
            }
        }
        Population::with_members("mutants", members, pop.tools().clone())
    }

    /// Resource-cleanup boundary (run start, run end, before directory
    /// publication).
    fn cleanup(&self) {
        self.refiner.cleanup();
        self.evaluator.cleanup();
    }
}

fn gen_stats(pop: &Population, generation: usize, duplicates_removed: usize) -> GenStats {
    let scaled: Vec<f64> = pop.flatten().filter_map(|c| c.scaled_fitness()).collect();
    let (best, worst, mean) = if scaled.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let best = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let worst = scaled.iter().copied().fold(f64::INFINITY, f64::min);
        let mean = scaled.iter().sum::<f64>() / scaled.len() as f64;
        (best, worst, mean)
    };

    GenStats {
        generation,
        best_scaled: best,
        mean_scaled: mean,
        worst_scaled: worst,
        failed_count: pop.flatten().filter(|c| c.evaluation_failed).count(),
        duplicates_removed,
        pop_size: pop.size(),
    }
}

/// Convenience for hosts that do not care about live telemetry: runs with
/// a drained channel and returns the terminal population.
pub fn run_to_completion(
    orchestrator: &mut GenerationOrchestrator,
) -> Result<Population, EngineError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let result = orchestrator.run(tx);
    drop(rx);
    result
}
