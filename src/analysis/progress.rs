use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::EngineError;
use crate::core::io;
use crate::core::population::Population;

/// Min/max/mean of one series across the flattened population.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl StatSummary {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self { min, max, mean })
    }
}

/// One generation's summary at the after-selection checkpoint.
/// Appended to the tracker and never revised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub generation: usize,
    pub pop_size: usize,
    pub failed_count: usize,
    /// Absent only when no candidate carries a scaled fitness.
    pub scaled: Option<StatSummary>,
    /// Per raw-fitness-component statistics over succeeded candidates.
    pub raw_components: Vec<StatSummary>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only record of per-generation statistics.
///
/// Serialized alongside the population checkpoints; on restart, the
/// restored sequence length determines the generation index to resume at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressTracker {
    snapshots: Vec<GenerationSnapshot>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[GenerationSnapshot] {
        &self.snapshots
    }

    /// Appends one snapshot computed from the current flattened
    /// population. The snapshot's generation index is the sequence
    /// position: 0 for the initial population, then one per generation.
    pub fn update(&mut self, population: &Population) {
        let scaled: Vec<f64> = population
            .flatten()
            .filter_map(|c| c.scaled_fitness())
            .collect();

        let mut width = 0;
        for c in population.flatten() {
            if let Some(raw) = c.raw_fitness() {
                width = width.max(raw.len());
            }
        }
        let raw_components = (0..width)
            .filter_map(|i| {
                let column: Vec<f64> = population
                    .flatten()
                    .filter_map(|c| c.raw_fitness())
                    .filter_map(|raw| raw.get(i).copied())
                    .collect();
                StatSummary::from_values(&column)
            })
            .collect();

        self.snapshots.push(GenerationSnapshot {
            generation: self.snapshots.len(),
            pop_size: population.size(),
            failed_count: population
                .flatten()
                .filter(|c| c.evaluation_failed)
                .count(),
            scaled: StatSummary::from_values(&scaled),
            raw_components,
            recorded_at: Utc::now(),
        });
    }

    /// Publishes the full sequence atomically.
    pub fn dump(&self, path: &Path) -> Result<(), EngineError> {
        io::write_json_atomic(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        io::read_json(path)
    }

    /// Tabular export for external plotting. Raw-component columns are
    /// padded to the widest snapshot.
    pub fn export_csv(&self, path: &Path) -> Result<(), EngineError> {
        let width = self
            .snapshots
            .iter()
            .map(|s| s.raw_components.len())
            .max()
            .unwrap_or(0);

        let mut header = vec![
            "generation".to_string(),
            "pop_size".to_string(),
            "failed_count".to_string(),
            "scaled_min".to_string(),
            "scaled_max".to_string(),
            "scaled_mean".to_string(),
        ];
        for i in 0..width {
            header.push(format!("raw{}_min", i));
            header.push(format!("raw{}_max", i));
            header.push(format!("raw{}_mean", i));
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&header)?;
        for snapshot in &self.snapshots {
            let mut record = vec![
                snapshot.generation.to_string(),
                snapshot.pop_size.to_string(),
                snapshot.failed_count.to_string(),
            ];
            push_summary(&mut record, snapshot.scaled.as_ref());
            for i in 0..width {
                push_summary(&mut record, snapshot.raw_components.get(i));
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn push_summary(record: &mut Vec<String>, summary: Option<&StatSummary>) {
    match summary {
        Some(s) => {
            record.push(s.min.to_string());
            record.push(s.max.to_string());
            record.push(s.mean.to_string());
        }
        None => {
            record.push(String::new());
            record.push(String::new());
            record.push(String::new());
        }
    }
}
