//! Bounded retry with exponential backoff
//!
//! A [`RetryPolicy`] wraps any fallible operation from the outside; the
//! operation itself never retries. The wrapped call either succeeds or
//! returns [`RetryExhausted`] carrying the last error it saw.

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Retry parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Terminal failure after every attempt has been used
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gave up after {} attempts: {}", self.attempts, self.last_error)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Rate source policy: 5 attempts, 2s doubling up to 30s
    pub fn rate_source() -> Self {
        Self::new(5, Duration::from_secs(2), Duration::from_secs(30))
    }

    /// Enrichment policy: 3 attempts, 2s doubling up to 10s
    pub fn enrichment() -> Self {
        Self::new(3, Duration::from_secs(2), Duration::from_secs(10))
    }

    /// Policy that retries without sleeping (tests, local files)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after the `attempt`-th failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run an async operation under this policy.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    log::error!("{} failed on final attempt {}: {}", label, attempt, e);
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Run a blocking operation under this policy
    pub fn run_blocking<T, E, F>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => {
                    log::error!("{} failed on final attempt {}: {}", label, attempt, e);
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::rate_source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::rate_source();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_blocking_succeeds_after_failures() {
        let calls = Cell::new(0);
        let result = RetryPolicy::immediate(3).run_blocking("op", |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err("transient")
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_blocking_exhausts() {
        let result: Result<(), _> =
            RetryPolicy::immediate(4).run_blocking("op", |_| Err("still down"));
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(err.last_error, "still down");
    }

    #[tokio::test]
    async fn test_async_exhausts() {
        let mut calls = 0;
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run("op", |_| {
                calls += 1;
                async { Err::<(), _>("HTTP 500") }
            })
            .await;
        assert_eq!(result.unwrap_err().attempts, 5);
        assert_eq!(calls, 5);
    }
}
