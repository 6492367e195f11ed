//! Bounded retry with linear backoff on rate limiting.

use std::time::Duration;

/// Default number of attempts per record, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default backoff unit; the n-th rate-limited retry waits `n` units.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// How a failed attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rate limited: back off before retrying.
    RateLimited,
    /// Anything else: retry immediately.
    Other,
}

/// Retry bounds shared by every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` calls (at least one) with the given backoff unit.
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Total attempts allowed per record.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before the next attempt after a rate-limited failure, given the
    /// attempts still remaining. Grows as attempts are used up.
    pub fn backoff_delay(&self, attempts_remaining: u32) -> Duration {
        let used = self.max_attempts.saturating_sub(attempts_remaining).max(1);
        self.backoff_base.saturating_mul(used)
    }

    /// Fresh state for one record.
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempts_remaining: self.max_attempts,
            last_error: None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF_BASE)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Try again after waiting (zero for non-rate-limit errors).
    Retry(Duration),
    /// Attempts exhausted.
    GiveUp,
}

/// Per-record retry progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts_remaining: u32,
    last_error: Option<ErrorKind>,
}

impl RetryState {
    /// Attempts not yet made.
    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// Attempts made so far.
    pub fn attempts_made(&self) -> u32 {
        self.policy.max_attempts - self.attempts_remaining
    }

    /// Kind of the most recent failure, if any.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Records one failed attempt and decides the next step.
    pub fn record_failure(&mut self, kind: ErrorKind) -> RetryStep {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.last_error = Some(kind);
        if self.attempts_remaining == 0 {
            return RetryStep::GiveUp;
        }
        match kind {
            ErrorKind::RateLimited => {
                RetryStep::Retry(self.policy.backoff_delay(self.attempts_remaining))
            }
            ErrorKind::Other => RetryStep::Retry(Duration::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_backoff_grows_then_gives_up() {
        let mut state = RetryPolicy::default().start();
        assert_eq!(
            state.record_failure(ErrorKind::RateLimited),
            RetryStep::Retry(Duration::from_secs(2))
        );
        assert_eq!(
            state.record_failure(ErrorKind::RateLimited),
            RetryStep::Retry(Duration::from_secs(4))
        );
        assert_eq!(state.record_failure(ErrorKind::RateLimited), RetryStep::GiveUp);
        assert_eq!(state.attempts_made(), 3);
        assert_eq!(state.last_error(), Some(ErrorKind::RateLimited));
    }

    #[test]
    fn other_errors_retry_immediately() {
        let mut state = RetryPolicy::default().start();
        assert_eq!(
            state.record_failure(ErrorKind::Other),
            RetryStep::Retry(Duration::ZERO)
        );
        assert_eq!(state.attempts_remaining(), 2);
    }

    #[test]
    fn backoff_is_monotonic_in_attempts_used() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100));
        let delays: Vec<Duration> = (1..6).rev().map(|left| policy.backoff_delay(left)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[4], Duration::from_millis(500));
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let mut state = RetryPolicy::new(0, Duration::from_secs(1)).start();
        assert_eq!(state.record_failure(ErrorKind::Other), RetryStep::GiveUp);
    }
}
