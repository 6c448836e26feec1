use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    None,
    Fixed(Duration),
    /// `k × step` after the k-th failed attempt.
    Linear { step: Duration },
}

impl Backoff {
    /// Delay to wait after the `attempt`-th failure, counted from one.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { step } => step.saturating_mul(attempt),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    attempts: u32,
    backoff: Backoff,
    sleep_cap: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Backoff) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
            sleep_cap: Duration::from_secs(60),
        }
    }

    pub fn linear(attempts: u32, step: Duration) -> Self {
        Self::new(attempts, Backoff::Linear { step })
    }

    pub fn with_sleep_cap(mut self, cap: Duration) -> Self {
        self.sleep_cap = cap;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt).min(self.sleep_cap)
    }

    /// Runs `operation` until it succeeds, the attempt budget is spent, or
    /// `should_retry` rejects an error. The closure receives the 1-based attempt number.
    pub async fn run<F, Fut, T, E, P>(
        &self,
        label: &str,
        mut operation: F,
        should_retry: P,
    ) -> Result<RetryOutcome<T>, RetryFailure<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1u32;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt,
                    })
                }
                Err(error) if attempt >= self.attempts || !should_retry(&error) => {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let wait = self.delay_for(attempt);
                    warn!(attempt, wait = ?wait, stage = label, error = %error, "retrying operation");
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
