use std::sync::Arc;

use anyhow::Result;
use log::warn;

use crate::core::candidate::Structure;
use crate::core::population::Population;

/// External structural-refinement collaborator (the OPTIMIZE stage).
///
/// Implementations typically shell out to long-running tools; they must be
/// thread-safe, as the batch pass runs candidates concurrently.
pub trait StructureRefiner: Send + Sync {
    fn name(&self) -> &str;

    /// Refines one structure. The returned structure must keep the same
    /// key: refinement changes the payload, never the identity.
    fn refine(&self, structure: &Structure) -> Result<Structure>;

    /// Best-effort teardown of any external resources (stray processes,
    /// scratch files) left behind by earlier refinement calls.
    fn cleanup(&self) {}
}

/// Applies the refiner to every candidate lacking a refined structure.
pub struct RefinementPass {
    strategy: Arc<dyn StructureRefiner>,
}

impl RefinementPass {
    pub fn new(strategy: Arc<dyn StructureRefiner>) -> Self {
        Self { strategy }
    }

    /// Refinement failures are per-candidate: the candidate keeps its
    /// unrefined structure and the run continues.
    pub fn run(&self, population: &Population) -> Population {
        population.map_candidates(|c| {
            if c.structure.refined {
                return c.clone();
            }
            let mut next = c.clone();
            match self.strategy.refine(&c.structure) {
                Ok(refined) if refined.key == c.structure.key => {
                    next.structure = refined;
                    next.structure.refined = true;
                }
                Ok(refined) => {
                    warn!(
                        "refiner `{}` changed structure key {} -> {}; keeping original",
                        self.strategy.name(),
                        c.structure.key,
                        refined.key
                    );
                }
                Err(e) => {
                    warn!(
                        "refinement of {} failed: {:#}; candidate left unrefined",
                        c.identity, e
                    );
                }
            }
            next
        })
    }

    pub fn cleanup(&self) {
        self.strategy.cleanup();
    }
}

/// Pass-through refiner for domains without a structural-refinement step.
/// Marks candidates refined without touching the payload.
#[derive(Debug, Clone, Default)]
pub struct IdentityRefiner;

impl StructureRefiner for IdentityRefiner {
    fn name(&self) -> &str {
        "identity"
    }

    fn refine(&self, structure: &Structure) -> Result<Structure> {
        Ok(structure.clone())
    }
}
