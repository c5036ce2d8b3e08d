//! Bounded exponential backoff for idempotent gateway calls.

use crate::JobError;
use job_types::{CatalogError, ResolutionError, StoreError};
use std::future::Future;
use std::time::Duration;

/// Errors that may succeed when retried.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Transient for CatalogError {
    fn is_transient(&self) -> bool {
        CatalogError::is_transient(self)
    }
}

impl Transient for ResolutionError {
    fn is_transient(&self) -> bool {
        ResolutionError::is_transient(self)
    }
}

impl Transient for JobError {
    fn is_transient(&self) -> bool {
        JobError::is_transient(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no sleeping.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or attempts run out.
pub async fn with_backoff<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(policy.multiplier.max(1));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
