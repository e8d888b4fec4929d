use std::path::PathBuf;

use thiserror::Error;

/// Fatal, run-aborting failures.
///
/// Per-candidate problems (refinement failure, fitness failure, timeout)
/// never appear here; they are folded into candidate fields by the stage
/// that observed them. Only invariant violations, configuration rejects and
/// unrecoverable persistence I/O reach the orchestrator as errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("population size invariant violated: expected {expected}, found {found}")]
    PopulationSize { expected: usize, found: usize },

    #[error("survivor selection requires {needed} candidates, only {available} available")]
    InsufficientCandidates { needed: usize, available: usize },

    #[error("unknown {kind} strategy `{name}`")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("invalid parameters for {kind} strategy `{name}`")]
    StrategyParams {
        kind: &'static str,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("normalization pipeline produced {len} values, expected a single scalar")]
    Normalization { len: usize },

    #[error("run initialization failed")]
    Init {
        #[source]
        source: anyhow::Error,
    },

    #[error("checkpoint {path} uses unsupported format {found} (supported: {supported})")]
    CheckpointFormat {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization failure: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("csv export failure: {0}")]
    Csv(#[from] csv::Error),
}
