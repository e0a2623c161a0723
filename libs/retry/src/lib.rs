//! Bounded polling and retry primitives.
//!
//! This library provides the two timing behaviors the cleanup handler is
//! built from:
//!
//! - **Bounded polling** ([`PollPolicy`]): probe a condition at a fixed
//!   interval until it holds or an overall deadline passes.
//! - **Bounded retry** ([`RetryPolicy`]): run an operation up to a fixed
//!   number of attempts, sleeping a fixed backoff between attempts that
//!   fail retryably.
//!
//! # Invariants
//!
//! - The first probe/attempt always runs immediately; policies never sleep
//!   before the first try.
//! - A deadline or attempt budget is a hard bound: once crossed, the policy
//!   reports it instead of sleeping again.
//! - All waiting goes through `tokio::time`, so tests drive these policies
//!   on the paused clock without real delays.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Default interval between poll probes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Default overall polling deadline.
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(300);

/// Default backoff between retry attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Default attempt budget for retried operations.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// The polling deadline passed before the probed condition held.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("deadline of {deadline:?} passed after {probes} probes")]
pub struct DeadlinePassed {
    /// Configured overall deadline.
    pub deadline: Duration,
    /// Number of probes issued, including the final one.
    pub probes: u32,
}

/// Fixed-interval polling bounded by an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between probes.
    pub interval: Duration,
    /// Overall time budget, measured from the first probe.
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

impl PollPolicy {
    /// Create a policy with the given interval and deadline.
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Probe `condition` until it yields a value or the deadline passes.
    ///
    /// The probe runs immediately, then every `interval`. A probe that is
    /// already past the deadline is still issued (the deadline bounds
    /// sleeping, not the final look), matching "check, then give up".
    pub async fn poll_until<T, F, Fut>(&self, mut condition: F) -> Result<T, DeadlinePassed>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let start = Instant::now();
        let mut probes = 0u32;

        loop {
            probes += 1;
            if let Some(value) = condition().await {
                return Ok(value);
            }

            if start.elapsed() >= self.deadline {
                return Err(DeadlinePassed {
                    deadline: self.deadline,
                    probes,
                });
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed retryably and the attempt budget ran out.
    #[error("gave up after {attempts} attempts")]
    Exhausted {
        /// Attempts issued.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last: E,
    },

    /// An attempt failed with an error the caller classified as fatal.
    #[error("aborted on non-retryable error")]
    Aborted(#[source] E),
}

impl<E> RetryError<E> {
    /// The underlying operation error, whichever way it ended.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }

    /// Returns true if the attempt budget was exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Fixed-backoff retry bounded by an attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between attempts.
    pub backoff: Duration,
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_RETRY_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given backoff and attempt budget.
    pub fn new(backoff: Duration, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `op` until it succeeds, fails fatally, or exhausts the budget.
    ///
    /// `op` receives the 1-based attempt number. After each failure,
    /// `retryable` decides whether the error is worth another attempt;
    /// fatal errors abort without sleeping.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        mut op: F,
        mut retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !retryable(&e) => return Err(RetryError::Aborted(e)),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: e,
                        });
                    }
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_secs = self.backoff.as_secs(),
                        "Attempt failed retryably, backing off"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn poll_returns_immediately_when_condition_holds() {
        let policy = PollPolicy::default();
        let start = Instant::now();

        let result = policy.poll_until(|| async { Some(42) }).await;

        assert_eq!(result, Ok(42));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_succeeds_after_a_few_probes() {
        let policy = PollPolicy::new(Duration::from_secs(15), Duration::from_secs(300));
        let probes = AtomicU32::new(0);
        let start = Instant::now();

        let result = policy
            .poll_until(|| {
                let n = probes.fetch_add(1, Ordering::SeqCst) + 1;
                async move { if n == 3 { Some("done") } else { None } }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(probes.load(Ordering::SeqCst), 3);
        // Two sleeps of 15s separate the three probes.
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_at_the_deadline() {
        let policy = PollPolicy::new(Duration::from_secs(15), Duration::from_secs(60));
        let probes = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .poll_until(|| {
                probes.fetch_add(1, Ordering::SeqCst);
                async { None }
            })
            .await;

        let err = result.unwrap_err();
        // Probes at t = 0, 15, 30, 45, 60; the last one lands on the
        // deadline and no further sleep happens.
        assert_eq!(err.probes, 5);
        assert_eq!(probes.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_without_backoff_on_first_attempt() {
        let policy = RetryPolicy::default();
        let start = Instant::now();

        let result: Result<u32, RetryError<&str>> =
            policy.run(|_| async { Ok(7) }, |_| true).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_after_retryable_failures() {
        let policy = RetryPolicy::new(Duration::from_secs(30), 5);
        let start = Instant::now();

        let result: Result<u32, RetryError<&str>> = policy
            .run(
                |attempt| async move {
                    if attempt < 3 {
                        Err("conflict")
                    } else {
                        Ok(attempt)
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        // Two failed attempts, each followed by a 30s backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_the_attempt_budget() {
        let policy = RetryPolicy::new(Duration::from_secs(30), 5);
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), RetryError<&str>> = policy
            .run(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("conflict") }
                },
                |_| true,
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        // Four backoffs separate the five attempts; no sleep after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_aborts_on_fatal_error_without_sleeping() {
        let policy = RetryPolicy::new(Duration::from_secs(30), 5);
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), RetryError<&str>> = policy
            .run(
                |_| {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("access denied") }
                },
                |e| *e == "conflict",
            )
            .await;

        let err = result.unwrap_err();
        assert!(!err.is_exhausted());
        assert_eq!(err.into_inner(), "access denied");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn retry_policy_clamps_zero_attempts() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 0);
        assert_eq!(policy.max_attempts, 1);
    }
}
