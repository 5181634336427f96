use crate::error::{ActivityError, ErrorKind};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub retryable: Vec<ErrorKind>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retryable: Vec<ErrorKind>) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            retryable,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.backoff_multiplier = multiplier;
        self.max_backoff = max;
        self
    }

    /// Capped exponential delay before attempt `attempt + 1`, where `attempt`
    /// counts failures so far (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(24) as i32;
        let scaled = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(scaled as u64).min(self.max_backoff)
    }

    /// The orchestrator never guesses retryability from error text; this is
    /// the only place the decision is made.
    pub fn decide(&self, error: &ActivityError, attempt: u32) -> RetryDecision {
        if !self.retryable.contains(&error.kind) {
            return RetryDecision::Fatal;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::Fatal;
        }
        RetryDecision::Retry(error.retry_after.unwrap_or_else(|| self.delay_for(attempt)))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicies {
    pub fetch: RetryPolicy,
    pub parse: RetryPolicy,
    pub embed: RetryPolicy,
    pub store: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            fetch: RetryPolicy::new(3, vec![ErrorKind::Network, ErrorKind::Remote]),
            // Transient read failures surface as LocalStorage from the parser.
            parse: RetryPolicy::new(2, vec![ErrorKind::LocalStorage]),
            embed: RetryPolicy::new(
                3,
                vec![
                    ErrorKind::RateLimit,
                    ErrorKind::ServiceUnavailable,
                    ErrorKind::Connection,
                ],
            ),
            store: RetryPolicy::new(3, vec![ErrorKind::Connection]),
        }
    }
}

impl RetryPolicies {
    /// Short backoffs across the board; used by tests and local smoke runs.
    pub fn fast() -> Self {
        let mut policies = Self::default();
        for policy in [
            &mut policies.fetch,
            &mut policies.parse,
            &mut policies.embed,
            &mut policies.store,
        ] {
            policy.initial_backoff = Duration::from_millis(1);
            policy.max_backoff = Duration::from_millis(5);
        }
        policies
    }
}

#[cfg(test)]
mod tests {
    use super::{RetryDecision, RetryPolicy};
    use crate::error::{ActivityError, ErrorKind};
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, vec![ErrorKind::Network, ErrorKind::RateLimit]).with_backoff(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(350),
        )
    }

    #[test]
    fn backoff_curve_is_exponential_and_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }

    #[test]
    fn non_retryable_kind_is_fatal_on_first_attempt() {
        let policy = policy();
        let error = ActivityError::new(ErrorKind::Authentication, "bad key");
        assert_eq!(policy.decide(&error, 1), RetryDecision::Fatal);
    }

    #[test]
    fn retryable_kind_becomes_fatal_once_attempts_are_exhausted() {
        let policy = policy();
        let error = ActivityError::new(ErrorKind::Network, "timeout");
        assert!(matches!(policy.decide(&error, 1), RetryDecision::Retry(_)));
        assert!(matches!(policy.decide(&error, 2), RetryDecision::Retry(_)));
        assert_eq!(policy.decide(&error, 3), RetryDecision::Fatal);
    }

    #[test]
    fn server_retry_hint_overrides_the_computed_delay() {
        let policy = policy();
        let error = ActivityError::new(ErrorKind::RateLimit, "slow down")
            .with_retry_after(Some(Duration::from_secs(9)));
        assert_eq!(
            policy.decide(&error, 1),
            RetryDecision::Retry(Duration::from_secs(9))
        );
    }
}
