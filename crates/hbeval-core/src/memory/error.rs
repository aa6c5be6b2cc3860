//! Error types for the certified memory subsystem.

/// Errors produced by memory operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Store or retrieval backend fault. Callers degrade, never abort.
    #[error("memory unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {id}")]
    RecordNotFound { id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for memory operations.
pub type MemoryResult<T> = std::result::Result<T, MemoryError>;
