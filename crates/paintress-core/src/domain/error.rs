//! Domain-level error taxonomy for Paintress.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while validating run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("continent does not exist: {}", .0.display())]
    ContinentMissing(PathBuf),

    #[error("continent is not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("model reserve must not be empty")]
    EmptyModelReserve,

    #[error("invalid model identifier: {0:?}")]
    InvalidModel(String),

    #[error("per-cycle timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max cycles must be greater than zero")]
    ZeroBudget,

    #[error("base branch must not be empty")]
    EmptyBaseBranch,

    #[error("invalid review fail pattern: {0}")]
    InvalidReviewPattern(String),

    #[error("unknown language: {0}")]
    UnknownLanguage(String),
}

/// Paintress domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PaintressError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("config error: {0}")]
    Config(String),

    #[error("working copy acquisition failed: {0}")]
    Acquisition(String),

    #[error("working copy setup failed: {0}")]
    Setup(String),

    #[error("agent invocation failed with model {model}: {reason}")]
    Invocation { model: String, reason: String },

    #[error("deadline of {}s exceeded", .0.as_secs())]
    DeadlineExceeded(Duration),

    #[error("pull request publish failed: {0}")]
    Publish(String),

    #[error("review failed: {0}")]
    Review(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("issue tracker error: {0}")]
    Tracker(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaintressError {
    /// Whether this error was caused by the process-wide cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PaintressError::Cancelled(_))
    }
}

impl From<reqwest::Error> for PaintressError {
    fn from(err: reqwest::Error) -> Self {
        PaintressError::Tracker(err.to_string())
    }
}

impl From<toml::de::Error> for PaintressError {
    fn from(err: toml::de::Error) -> Self {
        PaintressError::Config(err.to_string())
    }
}

/// Result type for Paintress domain operations.
pub type Result<T> = std::result::Result<T, PaintressError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = PaintressError::from(ValidationError::NotARepository(PathBuf::from("/tmp/x")));
        let msg = err.to_string();
        assert!(msg.contains("validation error"));
        assert!(msg.contains("/tmp/x"));
    }

    #[test]
    fn test_deadline_error_mentions_seconds() {
        let err = PaintressError::DeadlineExceeded(Duration::from_secs(1800));
        assert!(err.to_string().contains("1800s"));
    }

    #[test]
    fn test_only_cancelled_is_cancellation() {
        assert!(PaintressError::Cancelled("SIGINT".to_string()).is_cancellation());
        assert!(!PaintressError::Publish("no remote".to_string()).is_cancellation());
        assert!(!PaintressError::Acquisition("pool closed".to_string()).is_cancellation());
    }
}
