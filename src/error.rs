//! Top-level error type for the engine API.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller handed us something we cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The uploaded bytes could not be decoded into PCM.
    #[error("decode failure: {0}")]
    Decode(String),

    /// A match request exceeded its deadline before scoring finished.
    #[error("match deadline exceeded")]
    Timeout,

    /// A track with the same (source_type, source_id) already exists.
    #[error("track already present for {source_type}:{source_id}")]
    DuplicateTrack {
        source_type: String,
        source_id: String,
    },

    /// The referenced track or task does not exist.
    #[error("not found")]
    NotFound,

    /// The fingerprint store stayed unreachable after retries.
    #[error("index unavailable: {0}")]
    IndexUnavailable(#[source] sqlx::Error),

    /// Numeric failure inside the DSP stages.
    #[error("numeric error: {0}")]
    Numeric(String),
}

/// Convenience alias so callers can write `Result<T>`.
pub type Result<T> = std::result::Result<T, EngineError>;
