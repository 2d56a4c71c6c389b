// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff around the refresh call.

use std::future::Future;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::error::RefreshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_attempts, config.base_backoff())
    }

    /// Delay before retry number `attempt` (0-based): `base * 2^attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Sum of all delays when every attempt fails: `base * (2^max_attempts - 1)`.
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_attempts).map(|a| self.delay(a)).fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Run `op` until it succeeds, fails with [`RefreshError::Unauthorized`],
    /// or the retries are used up. `op` receives the 0-based call number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RefreshError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RefreshError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e @ RefreshError::Unauthorized(_)) => return Err(e),
                Err(e) => {
                    if attempt >= self.max_attempts {
                        tracing::warn!(attempts = attempt + 1, err = %e, "refresh retries exhausted");
                        return Err(e);
                    }
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        err = %e,
                        "refresh attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
