use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::slice;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::candidate::{Candidate, Identity};
use crate::core::error::EngineError;
use crate::core::io;
use crate::engine::registry::GATools;

// --- Constants ---

/// Bumped whenever the checkpoint layout changes incompatibly.
const CHECKPOINT_FORMAT: u32 = 1;

/// One generation's (or a comparison group's) working set, organized as a
/// rooted tree: direct members plus named subpopulations.
///
/// **Invariant**: membership changes always produce a *new* population
/// value. Older snapshots held by the orchestrator for rollback or
/// diagnostics are never mutated underneath it.
#[derive(Debug, Clone)]
pub struct Population {
    label: String,
    members: Vec<Candidate>,
    subpopulations: Vec<Population>,
    tools: Arc<GATools>,
}

impl Population {
    /// Explicit constructor from immutable parts; the strategy bundle is
    /// shared across all nodes of a run, never owned per-node.
    pub fn new(
        label: &str,
        members: Vec<Candidate>,
        subpopulations: Vec<Population>,
        tools: Arc<GATools>,
    ) -> Self {
        Self {
            label: label.to_string(),
            members,
            subpopulations,
            tools,
        }
    }

    pub fn with_members(label: &str, members: Vec<Candidate>, tools: Arc<GATools>) -> Self {
        Self::new(label, members, Vec::new(), tools)
    }

    pub fn empty(label: &str, tools: Arc<GATools>) -> Self {
        Self::with_members(label, Vec::new(), tools)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn members(&self) -> &[Candidate] {
        &self.members
    }

    pub fn subpopulations(&self) -> &[Population] {
        &self.subpopulations
    }

    pub fn tools(&self) -> &Arc<GATools> {
        &self.tools
    }

    /// Flattened candidate count across all descendant nodes.
    pub fn size(&self) -> usize {
        self.flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.subpopulations.iter().all(|p| p.is_empty())
    }

    /// Lazy depth-first iteration: a node's direct members first, then its
    /// subpopulations in order. This order defines "first occurrence" for
    /// deduplication.
    pub fn flatten(&self) -> Flatten<'_> {
        Flatten {
            members: self.members.iter(),
            stack: self.subpopulations.iter().rev().collect(),
        }
    }

    /// Returns a new population whose flattened set is the union (as a
    /// list, not yet deduplicated) of both operands, each preserved as a
    /// named subpopulation for provenance.
    pub fn merge(&self, other: &Population) -> Population {
        Population::new(
            "merged",
            Vec::new(),
            vec![self.clone(), other.clone()],
            self.tools.clone(),
        )
    }

    /// Attaches `pop` as a named child without flattening it, for
    /// structured multi-source comparisons.
    pub fn add_subpopulation(&self, pop: Population) -> Population {
        let mut subpopulations = self.subpopulations.clone();
        subpopulations.push(pop);
        Population::new(
            &self.label,
            self.members.clone(),
            subpopulations,
            self.tools.clone(),
        )
    }

    /// Retains one representative per distinct identity (first occurrence
    /// in flattening order), preserving tree shape and relative order.
    /// Idempotent.
    pub fn deduplicate(&self) -> Population {
        let mut seen = HashSet::new();
        self.dedup_node(&mut seen)
    }

    fn dedup_node(&self, seen: &mut HashSet<Identity>) -> Population {
        let members = self
            .members
            .iter()
            .filter(|c| seen.insert(c.identity.clone()))
            .cloned()
            .collect();
        let subpopulations = self
            .subpopulations
            .iter()
            .map(|p| p.dedup_node(seen))
            .collect();
        Population::new(&self.label, members, subpopulations, self.tools.clone())
    }

    /// Applies `f` to every candidate, in parallel per node, producing a
    /// new population of identical shape. The stages (refine, evaluate,
    /// normalize) are all expressed through this.
    pub fn map_candidates<F>(&self, f: F) -> Population
    where
        F: Fn(&Candidate) -> Candidate + Send + Sync,
    {
        self.map_node(&f)
    }

    fn map_node<F>(&self, f: &F) -> Population
    where
        F: Fn(&Candidate) -> Candidate + Send + Sync,
    {
        let members = self.members.par_iter().map(f).collect();
        let subpopulations = self.subpopulations.iter().map(|p| p.map_node(f)).collect();
        Population::new(&self.label, members, subpopulations, self.tools.clone())
    }

    /// Fallible variant of [`map_candidates`]; the first error aborts the
    /// mapping and the input is left untouched.
    ///
    /// [`map_candidates`]: Population::map_candidates
    pub fn try_map_candidates<F>(&self, f: F) -> Result<Population, EngineError>
    where
        F: Fn(&Candidate) -> Result<Candidate, EngineError> + Send + Sync,
    {
        self.try_map_node(&f)
    }

    fn try_map_node<F>(&self, f: &F) -> Result<Population, EngineError>
    where
        F: Fn(&Candidate) -> Result<Candidate, EngineError> + Send + Sync,
    {
        let members = self
            .members
            .par_iter()
            .map(f)
            .collect::<Result<Vec<_>, _>>()?;
        let subpopulations = self
            .subpopulations
            .iter()
            .map(|p| p.try_map_node(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Population::new(
            &self.label,
            members,
            subpopulations,
            self.tools.clone(),
        ))
    }

    /// Flattened candidates sorted by the ranking order: scaled fitness
    /// descending, identity tie-break.
    pub fn ranked(&self) -> Vec<&Candidate> {
        let mut all: Vec<&Candidate> = self.flatten().collect();
        all.sort_by(|a, b| a.ranking_cmp(b));
        all
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.flatten().min_by(|a, b| a.ranking_cmp(b))
    }

    // --- Persistence ---

    /// Externalizes every candidate's structure into `dir`, one file per
    /// identity. Filenames are derived from the fingerprint, so they are
    /// stable and collision-free for a deduplicated population.
    pub fn write(&self, dir: &Path) -> Result<(), EngineError> {
        fs::create_dir_all(dir)?;
        for candidate in self.flatten() {
            let path = dir.join(format!("{}.json", candidate.identity.filename()));
            io::write_json_atomic(&path, &candidate.structure)?;
        }
        Ok(())
    }

    /// Serializes the full tree (including all fitness state) into a
    /// single checkpoint blob, published atomically.
    pub fn dump(&self, path: &Path) -> Result<(), EngineError> {
        let blob = CheckpointBlob {
            format: CHECKPOINT_FORMAT,
            written_at: Utc::now(),
            root: self.to_node(),
        };
        io::write_json_atomic(path, &blob)
    }

    /// Restores a checkpoint produced by [`dump`], rebinding the restored
    /// tree to `tools`. A failed load never yields a partial population.
    ///
    /// [`dump`]: Population::dump
    pub fn load(path: &Path, tools: Arc<GATools>) -> Result<Population, EngineError> {
        let blob: CheckpointBlob = io::read_json(path)?;
        if blob.format != CHECKPOINT_FORMAT {
            return Err(EngineError::CheckpointFormat {
                path: path.to_path_buf(),
                found: blob.format,
                supported: CHECKPOINT_FORMAT,
            });
        }
        Ok(Population::from_node(blob.root, &tools))
    }

    fn to_node(&self) -> PopulationNode {
        PopulationNode {
            label: self.label.clone(),
            members: self.members.clone(),
            subpopulations: self.subpopulations.iter().map(|p| p.to_node()).collect(),
        }
    }

    fn from_node(node: PopulationNode, tools: &Arc<GATools>) -> Population {
        Population {
            label: node.label,
            members: node.members,
            subpopulations: node
                .subpopulations
                .into_iter()
                .map(|n| Population::from_node(n, tools))
                .collect(),
            tools: tools.clone(),
        }
    }
}

/// Structural equality: label, members and tree shape. The strategy bundle
/// is deliberately excluded; two snapshots of the same run compare equal.
impl PartialEq for Population {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.members == other.members
            && self.subpopulations == other.subpopulations
    }
}

// --- Iteration ---

pub struct Flatten<'a> {
    members: slice::Iter<'a, Candidate>,
    stack: Vec<&'a Population>,
}

impl<'a> Iterator for Flatten<'a> {
    type Item = &'a Candidate;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(c) = self.members.next() {
                return Some(c);
            }
            let node = self.stack.pop()?;
            self.members = node.members.iter();
            self.stack.extend(node.subpopulations.iter().rev());
        }
    }
}

// --- Checkpoint layout ---

#[derive(Serialize, Deserialize)]
struct CheckpointBlob {
    format: u32,
    written_at: DateTime<Utc>,
    root: PopulationNode,
}

#[derive(Serialize, Deserialize)]
struct PopulationNode {
    label: String,
    members: Vec<Candidate>,
    subpopulations: Vec<PopulationNode>,
}
