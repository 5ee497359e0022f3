use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Transient failure classes the fault injector can simulate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    ServerError,
    RateLimited,
    UpstreamUnavailable,
    BadGateway,
}

impl FaultClass {
    pub const ALL: [FaultClass; 4] = [
        FaultClass::ServerError,
        FaultClass::RateLimited,
        FaultClass::UpstreamUnavailable,
        FaultClass::BadGateway,
    ];

    pub fn http_status(&self) -> u16 {
        match self {
            FaultClass::ServerError => 500,
            FaultClass::RateLimited => 429,
            FaultClass::UpstreamUnavailable => 503,
            FaultClass::BadGateway => 502,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            FaultClass::ServerError => "Internal Server Error - Service temporarily unavailable",
            FaultClass::RateLimited => "Too Many Requests - Rate limit exceeded",
            FaultClass::UpstreamUnavailable => "Service Unavailable - Database connection lost",
            FaultClass::BadGateway => "Bad Gateway - Upstream service did not respond",
        }
    }
}

/// One injected failure. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FaultOutcome {
    pub class: FaultClass,
    pub http_status: u16,
    pub message: String,
    pub retryable: bool,
    pub suggested_retry_delay: u64,
}

impl FaultOutcome {
    pub fn new(class: FaultClass, suggested_retry_delay: u64) -> Self {
        Self {
            class,
            http_status: class.http_status(),
            message: class.message().to_string(),
            retryable: true,
            suggested_retry_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    #[error("Missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },
    #[error("Malformed request body: {0}")]
    Malformed(String),
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },
    #[error("Application already submitted ({application_id})")]
    Conflict { application_id: String },
    #[error("{}", .fault.message)]
    Injected { fault: FaultOutcome },
    #[error("Failed to submit application: {0}")]
    Unexpected(String),
}

impl SubmitError {
    pub fn http_status(&self) -> u16 {
        match self {
            SubmitError::Validation { .. } | SubmitError::Malformed(_) => 400,
            SubmitError::JobNotFound { .. } => 404,
            SubmitError::Conflict { .. } => 409,
            SubmitError::Injected { fault } => fault.http_status,
            SubmitError::Unexpected(_) => 500,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            SubmitError::Injected { fault } => fault.retryable,
            SubmitError::Unexpected(_) => true,
            SubmitError::Validation { .. }
            | SubmitError::Malformed(_)
            | SubmitError::JobNotFound { .. }
            | SubmitError::Conflict { .. } => false,
        }
    }

    /// Server-suggested wait before the identical request may be retried.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SubmitError::Injected { fault } => {
                Some(Duration::from_secs(fault.suggested_retry_delay))
            }
            _ => None,
        }
    }

    pub fn is_injected(&self) -> bool {
        matches!(self, SubmitError::Injected { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::Validation { .. } | SubmitError::Malformed(_) => "validation",
            SubmitError::JobNotFound { .. } => "not_found",
            SubmitError::Conflict { .. } => "conflict",
            SubmitError::Injected { .. } => "injected_transient",
            SubmitError::Unexpected(_) => "unexpected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_faults_are_retryable_with_delay() {
        let err = SubmitError::Injected {
            fault: FaultOutcome::new(FaultClass::RateLimited, 3),
        };
        assert_eq!(err.http_status(), 429);
        assert!(err.retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(err.to_string(), "Too Many Requests - Rate limit exceeded");
    }

    #[test]
    fn conflict_is_not_retryable() {
        let err = SubmitError::Conflict {
            application_id: "app-9".to_string(),
        };
        assert_eq!(err.http_status(), 409);
        assert!(!err.retryable());
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = SubmitError::Validation {
            missing: vec!["jobId", "coverLetter"],
        };
        assert_eq!(err.to_string(), "Missing required fields: jobId, coverLetter");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn catalog_covers_documented_statuses() {
        let mut statuses: Vec<u16> = FaultClass::ALL.iter().map(FaultClass::http_status).collect();
        statuses.sort_unstable();
        assert_eq!(statuses, vec![429, 500, 502, 503]);
    }
}
