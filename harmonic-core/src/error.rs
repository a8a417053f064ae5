//! Error types for the measurement core.
//!
//! Engine absence is deliberately *not* an error: every accessor on
//! [`TunerContext`](crate::context::TunerContext) degrades to a documented
//! default instead. The variants here cover the few operations that cannot
//! proceed at all.

use thiserror::Error;

/// Result type used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The input staging buffer for an engine tick could not be allocated.
    #[error("failed to allocate a staging buffer of {requested} samples")]
    StagingAllocation { requested: usize },

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
