//! Error types for dropcatch
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::remote::Rejection;

/// All error types that can occur while acquiring a target
#[derive(Debug, Error)]
pub enum DropcatchError {
    /// Network or HTTP-level failure talking to the registrar
    #[error("Transport error: {0}")]
    Transport(String),

    /// Registrar answered with a non-OK status that is not an authoritative rejection
    #[error("Remote status: {0}")]
    RemoteStatus(String),

    /// Registrar rejected the credentials or the call rate
    #[error("Rejected by remote: {0}")]
    Rejected(Rejection),

    /// Client refused to call out after an earlier authoritative rejection
    #[error("Client latched after {0}; no further calls are made")]
    Latched(Rejection),

    /// Hourly call budget is used up
    #[error("Hourly quota of {quota} calls exhausted")]
    QuotaExceeded { quota: u32 },

    /// Reply did not have the expected shape
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Purchasing window closed before the target was acquired
    #[error("No success within purchasing window of {window:?}")]
    DeadlineExceeded { window: Duration },

    /// Target name failed validation
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Worker task died before producing a result
    #[error("Worker error: {0}")]
    Worker(String),
}

impl DropcatchError {
    /// The rejection that must latch the shared client, if this is one.
    pub fn authoritative_rejection(&self) -> Option<Rejection> {
        match self {
            DropcatchError::Rejected(rejection) => Some(*rejection),
            _ => None,
        }
    }

    /// Errors after which every further call on the same client fails too.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DropcatchError::Rejected(_) | DropcatchError::Latched(_))
    }
}

impl From<reqwest::Error> for DropcatchError {
    fn from(err: reqwest::Error) -> Self {
        DropcatchError::Transport(err.to_string())
    }
}

/// Result type alias for dropcatch operations
pub type Result<T> = std::result::Result<T, DropcatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_error() {
        let err = DropcatchError::QuotaExceeded { quota: 60 };
        assert_eq!(err.to_string(), "Hourly quota of 60 calls exhausted");
    }

    #[test]
    fn test_latched_error() {
        let err = DropcatchError::Latched(Rejection::Unauthorized);
        assert_eq!(
            err.to_string(),
            "Client latched after 401 Unauthorized; no further calls are made"
        );
    }

    #[test]
    fn test_rejected_is_authoritative() {
        assert_eq!(
            DropcatchError::Rejected(Rejection::RateLimited).authoritative_rejection(),
            Some(Rejection::RateLimited)
        );
        assert_eq!(DropcatchError::Latched(Rejection::RateLimited).authoritative_rejection(), None);
        assert_eq!(DropcatchError::Transport("reset".to_string()).authoritative_rejection(), None);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DropcatchError::Rejected(Rejection::Unauthorized).is_fatal());
        assert!(DropcatchError::Latched(Rejection::Unauthorized).is_fatal());
        assert!(!DropcatchError::QuotaExceeded { quota: 60 }.is_fatal());
        assert!(!DropcatchError::MalformedResponse("bad".to_string()).is_fatal());
    }

    #[test]
    fn test_deadline_error_names_window() {
        let err = DropcatchError::DeadlineExceeded {
            window: Duration::from_secs(3600),
        };
        assert_eq!(err.to_string(), "No success within purchasing window of 3600s");
        assert!(!err.is_fatal());
    }
}
