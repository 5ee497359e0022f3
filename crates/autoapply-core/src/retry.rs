use crate::submission::SubmitError;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    /// A previous attempt already landed; the caller reconciles on this id.
    AlreadySubmitted { application_id: String },
    GiveUp,
}

/// How a submitting caller reacts to a classified submission failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub fallback_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            fallback_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// `attempt` is 1-based and counts the attempt that just failed.
    pub fn decide(&self, attempt: u32, err: &SubmitError) -> RetryDecision {
        if let SubmitError::Conflict { application_id } = err {
            return RetryDecision::AlreadySubmitted {
                application_id: application_id.clone(),
            };
        }
        if !err.retryable() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let after = err
            .retry_after()
            .unwrap_or(self.fallback_delay)
            .min(self.max_delay);
        RetryDecision::Retry { after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{FaultClass, FaultOutcome};

    fn injected(delay: u64) -> SubmitError {
        SubmitError::Injected {
            fault: FaultOutcome::new(FaultClass::UpstreamUnavailable, delay),
        }
    }

    #[test]
    fn transient_failures_retry_with_suggested_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(1, &injected(4)),
            RetryDecision::Retry {
                after: Duration::from_secs(4)
            }
        );
    }

    #[test]
    fn suggested_delay_is_clamped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(2),
            ..RetryPolicy::default()
        };
        assert_eq!(
            policy.decide(1, &injected(5)),
            RetryDecision::Retry {
                after: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn attempts_are_bounded() {
        let policy = RetryPolicy::default().with_max_attempts(2);
        assert!(matches!(policy.decide(1, &injected(1)), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(2, &injected(1)), RetryDecision::GiveUp);
    }

    #[test]
    fn conflict_on_retry_counts_as_success() {
        let policy = RetryPolicy::default();
        let decision = policy.decide(
            3,
            &SubmitError::Conflict {
                application_id: "app-1".to_string(),
            },
        );
        assert_eq!(
            decision,
            RetryDecision::AlreadySubmitted {
                application_id: "app-1".to_string()
            }
        );
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let not_found = SubmitError::JobNotFound {
            job_id: "J404".to_string(),
        };
        assert_eq!(policy.decide(1, &not_found), RetryDecision::GiveUp);
        let unexpected = SubmitError::Unexpected("disk full".to_string());
        assert_eq!(
            policy.decide(1, &unexpected),
            RetryDecision::Retry {
                after: Duration::from_secs(1)
            }
        );
    }
}
