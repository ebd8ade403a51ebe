//! Unified error type for the delivery pipeline.
//!
//! Every HTTP-facing failure funnels into [`Error`], which carries enough context
//! for handlers to derive a status code via [`Error::http_status`].

use std::fmt;

/// Error type covering the failure modes of castforge request handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "session", "segment").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The source could not be inspected and no fallback was permitted.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source is still being written and cannot be segmented yet.
    #[error("Source incomplete: {0}")]
    SourceIncomplete(String),

    /// The session was torn down while the request was in flight.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// An external tool (ffmpeg, ffprobe) failed.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An operation did not make progress within its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::SourceUnavailable(_) => 422,
            Error::SourceIncomplete(_) => 409,
            Error::SessionClosed(_) => 410,
            Error::Tool { .. } => 502,
            Error::Timeout(_) => 504,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::SourceUnavailable(_) => "source_unavailable",
            Error::SourceIncomplete(_) => "source_incomplete",
            Error::SessionClosed(_) => "session_closed",
            Error::Tool { .. } => "tool_error",
            Error::Timeout(_) => "timeout",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("session", "abc-123");
        assert_eq!(err.to_string(), "session not found: abc-123");
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn validation_display() {
        let err = Error::Validation("unknown quality".into());
        assert_eq!(err.to_string(), "Validation error: unknown quality");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn source_unavailable_is_unprocessable() {
        let err = Error::SourceUnavailable("no video stream".into());
        assert_eq!(err.http_status(), 422);
    }

    #[test]
    fn source_incomplete_is_conflict() {
        let err = Error::SourceIncomplete("show/episode.mkv.part".into());
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.code(), "source_incomplete");
    }

    #[test]
    fn session_closed_is_gone() {
        let err = Error::SessionClosed("abc".into());
        assert_eq!(err.http_status(), 410);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "failed to spawn");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: failed to spawn");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn timeout_is_gateway_timeout() {
        let err = Error::Timeout("no encoder output".into());
        assert_eq!(err.http_status(), 504);
        assert_eq!(err.code(), "timeout");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }
}
