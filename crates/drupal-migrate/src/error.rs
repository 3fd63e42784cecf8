//! Error types for `drupal-migrate`.
//!
//! Only two kinds of failure stop a run: the origin store cannot be queried, or
//! the configuration/connection is unusable. Everything that goes wrong for a
//! single item is reported as [`Error::SinkWrite`] and absorbed by the runner.

use thiserror::Error;

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while migrating.
///
/// Error codes follow the pattern `D7M-XXX` for easy grepping in logs.
#[derive(Error, Debug)]
pub enum Error {
    /// An origin (or validator scan) query failed (D7M-001).
    #[error("[D7M-001] Source query failed: {0}")]
    SourceQuery(String),

    /// A target insert/update was rejected (D7M-002).
    #[error("[D7M-002] Sink write failed: {0}")]
    SinkWrite(String),

    /// Configuration error (D7M-003).
    #[error("[D7M-003] Configuration error: {0}")]
    Config(String),

    /// Could not establish a database connection (D7M-004).
    #[error("[D7M-004] Database connection failed: {0}")]
    Connection(String),

    /// IO error (D7M-005).
    #[error("[D7M-005] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parse error (D7M-006).
    #[error("[D7M-006] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the error code (e.g., "D7M-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SourceQuery(_) => "D7M-001",
            Self::SinkWrite(_) => "D7M-002",
            Self::Config(_) => "D7M-003",
            Self::Connection(_) => "D7M-004",
            Self::Io(_) => "D7M-005",
            Self::Yaml(_) => "D7M-006",
        }
    }

    /// Returns true if this error aborts a whole run.
    ///
    /// Sink write failures are per item; the runner logs and counts them.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::SinkWrite(_))
    }

    pub(crate) fn query_failed(err: sqlx::Error) -> Self {
        Self::SourceQuery(err.to_string())
    }

    pub(crate) fn write_failed(err: sqlx::Error) -> Self {
        Self::SinkWrite(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::SourceQuery("x".into()).code(), "D7M-001");
        assert_eq!(Error::SinkWrite("x".into()).code(), "D7M-002");
        assert_eq!(Error::Config("x".into()).code(), "D7M-003");
    }

    #[test]
    fn test_only_sink_errors_are_recoverable() {
        assert!(!Error::SinkWrite("duplicate login".into()).is_fatal());
        assert!(Error::SourceQuery("table missing".into()).is_fatal());
        assert!(Error::Connection("refused".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_code() {
        let err = Error::SinkWrite("Content, title, and excerpt are empty.".into());
        assert!(err.to_string().starts_with("[D7M-002]"));
    }
}
