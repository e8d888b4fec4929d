use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Structural fingerprint identifying a candidate.
///
/// Equality and deduplication go through this value, never through memory
/// identity, so it must be stable across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A filesystem-safe rendition of the fingerprint, used for structure
    /// file names. Collision-free as long as fingerprints only differ in
    /// characters that survive the mapping (alphanumerics, '-', '_', '.').
    pub fn filename(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque structural payload.
///
/// The engine never interprets `blob`; producing it, canonicalizing it and
/// deriving `key` from it is the job of the external structure collaborator.
/// `key` doubles as the candidate fingerprint and must not change during
/// refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub key: String,
    pub blob: serde_json::Value,
    pub refined: bool,
}

impl Structure {
    pub fn new(key: impl Into<String>, blob: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            blob,
            refined: false,
        }
    }
}

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Generation index at creation (0 for the initial population).
    pub generation: u64,
    /// Parent fingerprints, empty for seeded candidates.
    pub parents: Vec<Identity>,
    /// Human-readable origin tag ("Initial", "Crossover", "Mutation", ...).
    pub origin: String,
}

/// One solution in the population: opaque structure plus fitness and
/// provenance bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub identity: Identity,
    pub structure: Structure,
    raw_fitness: Option<Vec<f64>>,
    scaled_fitness: Option<f64>,
    pub evaluation_failed: bool,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn new(structure: Structure, generation: u64, origin: &str) -> Self {
        Self {
            identity: Identity(structure.key.clone()),
            structure,
            raw_fitness: None,
            scaled_fitness: None,
            evaluation_failed: false,
            provenance: Provenance {
                generation,
                parents: Vec::new(),
                origin: origin.to_string(),
            },
        }
    }

    /// A crossover child. Parents are recorded in flattening order.
    pub fn offspring(structure: Structure, generation: u64, parents: Vec<Identity>) -> Self {
        let mut c = Candidate::new(structure, generation, "Crossover");
        c.provenance.parents = parents;
        c
    }

    /// A mutated copy of `parent`.
    pub fn mutant(structure: Structure, generation: u64, parent: Identity) -> Self {
        let mut c = Candidate::new(structure, generation, "Mutation");
        c.provenance.parents = vec![parent];
        c
    }

    pub fn raw_fitness(&self) -> Option<&[f64]> {
        self.raw_fitness.as_deref()
    }

    pub fn scaled_fitness(&self) -> Option<f64> {
        self.scaled_fitness
    }

    /// True if the evaluator still owes this candidate a verdict.
    pub fn needs_evaluation(&self) -> bool {
        self.raw_fitness.is_none() && !self.evaluation_failed
    }

    /// Records a successful evaluation.
    ///
    /// **Invariant**: any write to the raw fitness clears the scaled score,
    /// so a scaled value is only ever present if normalization ran after the
    /// last raw change.
    pub fn set_raw_fitness(&mut self, values: Vec<f64>) {
        self.raw_fitness = Some(values);
        self.scaled_fitness = None;
        self.evaluation_failed = false;
    }

    /// Records an evaluation failure. Distinct from "evaluated and poor":
    /// the candidate stays in the population and remains eligible for
    /// deduplication and (de-prioritized) selection.
    pub fn mark_evaluation_failed(&mut self) {
        self.raw_fitness = None;
        self.scaled_fitness = None;
        self.evaluation_failed = true;
    }

    /// Assigns the scaled score. Called by the normalization pipeline only.
    pub fn set_scaled_fitness(&mut self, value: f64) {
        self.scaled_fitness = Some(value);
    }

    /// Total order used for ranking and survivor selection: scaled fitness
    /// descending, unscored candidates last, ties broken by identity so the
    /// order is deterministic and restart-stable.
    pub fn ranking_cmp(&self, other: &Candidate) -> Ordering {
        match (self.scaled_fitness, other.scaled_fitness) {
            (Some(a), Some(b)) => b
                .total_cmp(&a)
                .then_with(|| self.identity.cmp(&other.identity)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.identity.cmp(&other.identity),
        }
    }
}
