use std::sync::Arc;

use log::debug;

use crate::core::error::EngineError;
use crate::core::population::Population;

/// Population-wide raw-fitness statistics, computed per component over the
/// successfully evaluated candidates.
///
/// Recomputed freshly on every normalization pass; statistics are
/// population-relative, so stale values from before a merge are never
/// reused.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationStats {
    /// Number of candidates with a raw fitness.
    pub count: usize,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub mean: Vec<f64>,
}

impl PopulationStats {
    pub fn collect(population: &Population) -> Self {
        let mut width = 0;
        for c in population.flatten() {
            if let Some(raw) = c.raw_fitness() {
                width = width.max(raw.len());
            }
        }

        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        let mut sum = vec![0.0; width];
        let mut counts = vec![0usize; width];
        let mut count = 0;

        for c in population.flatten() {
            let Some(raw) = c.raw_fitness() else { continue };
            count += 1;
            for (i, &v) in raw.iter().enumerate() {
                if v < min[i] {
                    min[i] = v;
                }
                if v > max[i] {
                    max[i] = v;
                }
                sum[i] += v;
                counts[i] += 1;
            }
        }

        let mean = sum
            .iter()
            .zip(&counts)
            .map(|(s, &n)| if n > 0 { s / n as f64 } else { 0.0 })
            .collect();

        Self {
            count,
            min,
            max,
            mean,
        }
    }

    fn component_min(&self, i: usize) -> f64 {
        self.min.get(i).copied().unwrap_or(0.0)
    }

    fn component_mean(&self, i: usize) -> f64 {
        self.mean.get(i).copied().unwrap_or(0.0)
    }
}

// --- Steps ---

/// One transformation in the pipeline: a pure function of the population
/// statistics and a candidate's fitness vector. No hidden RNG, so a pass
/// over an unchanged population is repeatable.
trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, stats: &PopulationStats, values: Vec<f64>) -> Vec<f64>;
}

/// Raises every component to a fixed exponent.
struct Power {
    exponent: f64,
}

impl Step for Power {
    fn name(&self) -> &'static str {
        "power"
    }

    fn apply(&self, _stats: &PopulationStats, values: Vec<f64>) -> Vec<f64> {
        values.into_iter().map(|v| v.powf(self.exponent)).collect()
    }
}

/// Component-wise multiplication; missing coefficients default to 1.
struct Multiply {
    coefficients: Vec<f64>,
}

impl Step for Multiply {
    fn name(&self) -> &'static str {
        "multiply"
    }

    fn apply(&self, _stats: &PopulationStats, values: Vec<f64>) -> Vec<f64> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| v * self.coefficients.get(i).copied().unwrap_or(1.0))
            .collect()
    }
}

/// Divides each component by its population mean, putting differently
/// scaled components on a comparable footing. Zero means pass through.
struct DivideByMean;

impl Step for DivideByMean {
    fn name(&self) -> &'static str {
        "divide_by_mean"
    }

    fn apply(&self, stats: &PopulationStats, values: Vec<f64>) -> Vec<f64> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let mean = stats.component_mean(i);
                if mean != 0.0 {
                    v / mean
                } else {
                    v
                }
            })
            .collect()
    }
}

/// Shifts components with a non-positive population minimum into the
/// strictly positive range (useful ahead of fitness-proportional
/// selection).
struct ShiftUp;

impl Step for ShiftUp {
    fn name(&self) -> &'static str {
        "shift_up"
    }

    fn apply(&self, stats: &PopulationStats, values: Vec<f64>) -> Vec<f64> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let min = stats.component_min(i);
                if min <= 0.0 {
                    v - min + 1.0
                } else {
                    v
                }
            })
            .collect()
    }
}

/// Collapses the vector into a single scalar by summation. Every pipeline
/// ends with a collapsing step.
struct Sum;

impl Step for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn apply(&self, _stats: &PopulationStats, values: Vec<f64>) -> Vec<f64> {
        vec![values.iter().sum()]
    }
}

// --- Pipeline ---

/// Ordered sequence of normalization steps turning raw, possibly
/// multi-component fitness vectors into one scaled scalar per candidate.
#[derive(Clone)]
pub struct NormalizationPipeline {
    steps: Vec<Arc<dyn Step>>,
}

impl NormalizationPipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn power(mut self, exponent: f64) -> Self {
        self.steps.push(Arc::new(Power { exponent }));
        self
    }

    pub fn multiply(mut self, coefficients: Vec<f64>) -> Self {
        self.steps.push(Arc::new(Multiply { coefficients }));
        self
    }

    pub fn divide_by_mean(mut self) -> Self {
        self.steps.push(Arc::new(DivideByMean));
        self
    }

    pub fn shift_up(mut self) -> Self {
        self.steps.push(Arc::new(ShiftUp));
        self
    }

    pub fn sum(mut self) -> Self {
        self.steps.push(Arc::new(Sum));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Assigns a scaled fitness to every candidate.
    ///
    /// Statistics are collected over the current flattened population, the
    /// steps run per candidate, and the final step must leave exactly one
    /// scalar (anything else is a configuration error and fatal).
    ///
    /// Failed or unevaluated candidates receive the sentinel-worst score:
    /// the minimum scaled fitness among succeeded candidates, so a numeric
    /// accident can never make them win selection.
    pub fn normalize(&self, population: &Population) -> Result<Population, EngineError> {
        let stats = PopulationStats::collect(population);
        debug!(
            "normalizing {} candidates ({} scored) through [{}]",
            population.size(),
            stats.count,
            self.step_names().join(", ")
        );

        let scored = population.try_map_candidates(|c| {
            let Some(raw) = c.raw_fitness() else {
                return Ok(c.clone());
            };
            let mut values = raw.to_vec();
            for step in &self.steps {
                values = step.apply(&stats, values);
            }
            if values.len() != 1 {
                return Err(EngineError::Normalization { len: values.len() });
            }
            let mut next = c.clone();
            next.set_scaled_fitness(values[0]);
            Ok(next)
        })?;

        let sentinel = scored
            .flatten()
            .filter(|c| c.raw_fitness().is_some())
            .filter_map(|c| c.scaled_fitness())
            .fold(f64::INFINITY, f64::min);
        let sentinel = if sentinel.is_finite() { sentinel } else { 0.0 };

        // Keyed on the raw fitness, not the scaled one: a failed candidate
        // surviving from an earlier pass must get this pass's sentinel,
        // not keep a stale one.
        Ok(scored.map_candidates(|c| {
            if c.raw_fitness().is_some() {
                return c.clone();
            }
            let mut next = c.clone();
            next.set_scaled_fitness(sentinel);
            next
        }))
    }
}

impl Default for NormalizationPipeline {
    fn default() -> Self {
        Self::new().sum()
    }
}

impl std::fmt::Debug for NormalizationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizationPipeline")
            .field("steps", &self.step_names())
            .finish()
    }
}
