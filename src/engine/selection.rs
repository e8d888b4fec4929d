use log::debug;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::core::candidate::Candidate;
use crate::core::error::EngineError;
use crate::core::population::Population;

/// Chooses which candidates participate in crossover or mutation.
///
/// `ranked` is sorted best-first with the population's total order, so an
/// index of 0 is the current best. Sampling is with replacement unless a
/// policy says otherwise, and must be deterministic for a given rng state.
pub trait MatingSelector: Send + Sync {
    fn name(&self) -> &str;

    fn select(&self, ranked: &[&Candidate], count: usize, rng: &mut ChaCha8Rng) -> Vec<usize>;
}

/// K-way tournament: for each pick, sample `size` contestants uniformly
/// and keep the best (lowest rank index).
#[derive(Debug, Clone)]
pub struct Tournament {
    pub size: usize,
}

impl MatingSelector for Tournament {
    fn name(&self) -> &str {
        "tournament"
    }

    fn select(&self, ranked: &[&Candidate], count: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let k = self.size.max(1);
        (0..count)
            .map(|_| {
                let mut best = rng.gen_range(0..ranked.len());
                for _ in 1..k {
                    let contender = rng.gen_range(0..ranked.len());
                    if contender < best {
                        best = contender;
                    }
                }
                best
            })
            .collect()
    }
}

/// Fitness-proportional (roulette-wheel) sampling on scaled fitness,
/// shifted so the worst candidate still has a small non-zero slice.
#[derive(Debug, Clone, Default)]
pub struct Roulette;

impl MatingSelector for Roulette {
    fn name(&self) -> &str {
        "roulette"
    }

    fn select(&self, ranked: &[&Candidate], count: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let scores: Vec<f64> = ranked
            .iter()
            .map(|c| c.scaled_fitness().unwrap_or(0.0))
            .collect();
        let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let floor = (max - min) * 0.01 + 1e-12;
        let weights: Vec<f64> = scores.iter().map(|s| s - min + floor).collect();
        sample_weighted(&weights, count, rng)
    }
}

/// Linear rank weighting: the best of n candidates gets weight n, the
/// worst gets 1. Insensitive to the scale of the fitness values.
#[derive(Debug, Clone, Default)]
pub struct RankWeighted;

impl MatingSelector for RankWeighted {
    fn name(&self) -> &str {
        "rank"
    }

    fn select(&self, ranked: &[&Candidate], count: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let n = ranked.len();
        let weights: Vec<f64> = (0..n).map(|i| (n - i) as f64).collect();
        sample_weighted(&weights, count, rng)
    }
}

fn sample_weighted(weights: &[f64], count: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return (0..count).map(|_| rng.gen_range(0..weights.len())).collect();
    }
    (0..count)
        .map(|_| {
            let mut target = rng.gen::<f64>() * total;
            for (i, w) in weights.iter().enumerate() {
                target -= w;
                if target <= 0.0 {
                    return i;
                }
            }
            weights.len() - 1
        })
        .collect()
}

/// Shrinks a population back to exactly `pop_size` survivors by ranked
/// truncation: scaled fitness descending, identity tie-break.
///
/// An input smaller than `pop_size` signals an upstream invariant
/// violation and fails fast without touching the input.
pub fn select_survivors(
    population: &Population,
    pop_size: usize,
) -> Result<Population, EngineError> {
    let available = population.size();
    if available < pop_size {
        return Err(EngineError::InsufficientCandidates {
            needed: pop_size,
            available,
        });
    }

    let ranked = population.ranked();
    let members: Vec<Candidate> = ranked[..pop_size].iter().map(|c| (*c).clone()).collect();
    debug!(
        "survivor selection kept {} of {} candidates",
        members.len(),
        available
    );
    Ok(Population::with_members(
        "selected",
        members,
        population.tools().clone(),
    ))
}
