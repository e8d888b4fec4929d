//! Generational evolutionary-optimization engine.
//!
//! The crate owns the population lifecycle: the population tree
//! (merge/dedup/subpopulations), the per-generation state machine, the
//! fitness-normalization pipeline and the selection algorithms. The
//! expensive, fallible parts — structural refinement, fitness evaluation,
//! crossover and mutation — are external collaborators plugged in through
//! the [`engine::registry::StrategyRegistry`].

pub mod analysis;
pub mod core;
pub mod engine;
pub mod solvers;
