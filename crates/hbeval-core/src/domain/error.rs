//! Domain-level error taxonomy for HB-Eval.
//!
//! Only structurally invalid input and unrecoverable I/O surface here.
//! Per-attempt faults (timeouts, agent errors) are recorded as failure
//! outcomes on the attempt and never reach the caller as errors.

/// Errors produced by the agent capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("agent fault: {0}")]
    Fault(String),

    #[error("agent rejected variant {variant_id}: {reason}")]
    Rejected { variant_id: String, reason: String },
}

/// HB-Eval domain errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("insufficient samples: {observed} attempts, at least {required} needed for variance")]
    InsufficientSamples { observed: usize, required: usize },

    #[error("invalid repetition count: K must be at least 1, got {0}")]
    InvalidRepetitions(usize),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for HB-Eval domain operations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
