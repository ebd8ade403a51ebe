//! Error types for castforge-media.

use thiserror::Error;

/// Result type for castforge-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for castforge-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred while scanning encoder output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The name does not match any rendition profile.
    #[error("Unknown quality: {0}")]
    UnknownQuality(String),

    /// The name is not a segment file this pipeline produces.
    #[error("Invalid segment name: {0}")]
    InvalidSegmentName(String),
}
