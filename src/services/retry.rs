// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Bounded retry for lookups that may race an asynchronous writer.
//!
//! The driver knows nothing about profiles or logging: each attempt reports
//! whether it found the value, found nothing yet, failed, or wants to stop.

use std::future::Future;
use std::time::Duration;

/// Delay growth between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay multiplied by `factor` after each retry, capped at `max_delay`.
    Exponential { factor: u32, max_delay: Duration },
}

impl Backoff {
    /// Doubling backoff capped at ten seconds.
    pub fn exponential() -> Self {
        Backoff::Exponential {
            factor: 2,
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Attempt budget and delay strategy for one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-delay policy. A budget of zero is treated as one attempt.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff: Backoff::Fixed,
        }
    }

    /// 3 attempts, 1s apart.
    pub fn sign_in_default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }

    /// The row is known to be pending after sign-up: more attempts, shorter gaps.
    pub fn sign_up_default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential { factor, max_delay } => {
                let exp = attempt.saturating_sub(1);
                let multiplier = factor.max(1).saturating_pow(exp);
                self.initial_delay
                    .checked_mul(multiplier)
                    .unwrap_or(max_delay)
                    .min(max_delay)
            }
        }
    }
}

/// What a single attempt observed.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Found(T),
    /// Nothing there yet; worth asking again.
    Missing,
    Failed(E),
    /// Stop without trying again (e.g. the caller no longer wants the result).
    Abort,
}

/// Final result of a retried lookup.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Found(T),
    /// Every attempt came back empty, or the last one did.
    NotFound,
    /// The last attempt failed with this error.
    Failed(E),
    Aborted,
}

/// Run `op` until it finds a value, aborts, or the attempt budget runs out.
///
/// `op` receives the 1-based attempt number. Errors and misses on
/// intermediate attempts are absorbed; only the final attempt decides
/// between `NotFound` and `Failed`. Sleeps use the tokio timer and never
/// block the runtime.
pub async fn retry_lookup<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 1;
    loop {
        let last = attempt >= policy.max_attempts;
        match op(attempt).await {
            Attempt::Found(value) => return RetryOutcome::Found(value),
            Attempt::Abort => return RetryOutcome::Aborted,
            Attempt::Missing if last => return RetryOutcome::NotFound,
            Attempt::Failed(err) if last => return RetryOutcome::Failed(err),
            Attempt::Missing | Attempt::Failed(_) => {}
        }

        tokio::time::sleep(policy.delay_after(attempt)).await;
        attempt += 1;
    }
}
