//! Pass-level error classification.
//!
//! A reconciliation pass can fail at two boundaries: the provider fetch and
//! the overlay store. Either aborts the pass and leaves the prior unified
//! state in place. Errors are classified by recoverability so the shell can
//! decide whether a retry button makes sense.

use serde::Serialize;
use thiserror::Error;

use crate::call_source::SourceError;
use crate::overlay::DbError;

/// Why a reconciliation pass aborted.
#[derive(Debug, Error)]
pub enum PassError {
    #[error("Call source error: {0}")]
    Source(#[from] SourceError),

    #[error("Overlay store error: {0}")]
    Db(#[from] DbError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PassError {
    /// Returns true if this error is plausibly transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            PassError::Source(SourceError::Http(_)) => true,
            PassError::Source(SourceError::Api { status, .. }) => {
                *status == 429 || *status == 408 || *status >= 500
            }
            PassError::Source(SourceError::AuthRejected) => false,
            PassError::Db(_) => false,
            PassError::Internal(_) => false,
        }
    }

    /// Get a user-friendly recovery suggestion.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PassError::Source(SourceError::AuthRejected) => {
                "Check the provider API key in ~/.calldesk/config.json."
            }
            PassError::Source(_) => "Check your internet connection and refresh again.",
            PassError::Db(_) => "Check disk space and permissions for ~/.calldesk/.",
            PassError::Internal(_) => "Refresh again; report this if it keeps happening.",
        }
    }
}

/// Serializable error representation for the dashboard shell.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfacedError {
    pub message: String,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

impl From<&PassError> for SurfacedError {
    fn from(err: &PassError) -> Self {
        SurfacedError {
            message: err.to_string(),
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = PassError::Source(SourceError::Api {
            status: 429,
            message: "slow down".to_string(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_auth_rejection_is_not_retryable() {
        let err = PassError::Source(SourceError::AuthRejected);
        assert!(!err.is_retryable());
        assert!(err.recovery_suggestion().contains("API key"));
    }

    #[test]
    fn test_db_errors_are_not_retryable() {
        let err = PassError::Db(DbError::HomeDirNotFound);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_surfaced_error_projection() {
        let err = PassError::Source(SourceError::Api {
            status: 503,
            message: "maintenance".to_string(),
        });
        let surfaced = SurfacedError::from(&err);
        assert!(surfaced.can_retry);
        assert!(surfaced.message.contains("503"));
        assert!(!surfaced.recovery_suggestion.is_empty());
    }
}
