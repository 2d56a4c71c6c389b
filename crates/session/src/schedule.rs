// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh scheduling policy.
//!
//! Pure functions of a token and the current time; the timer that acts on
//! them lives in [`crate::controller`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::token::{remaining_lifetime, should_refresh, total_lifetime, BearerToken};

/// Smallest delay ever armed, so an expired token cannot spin the scheduler.
pub const MIN_TICK: Duration = Duration::from_secs(1);

/// Lifecycle of the scheduled refresh check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No timer pending.
    Idle,
    /// A check is pending.
    Armed,
    /// A refresh call is in flight.
    Refreshing,
    /// Terminal: no refresh token, or the refresh token was rejected.
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Armed => f.write_str("armed"),
            Self::Refreshing => f.write_str("refreshing"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Timing inputs for the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Lifetime assumed when the token has no `iat`/`exp`.
    pub fallback_lifetime: Duration,
    /// Threshold for the refresh-on-start check.
    pub near_expiry: Duration,
    /// Short bounded retry after a transient failure.
    pub retry_delay: Duration,
}

impl Policy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            fallback_lifetime: config.fallback_lifetime(),
            near_expiry: config.near_expiry(),
            retry_delay: config.retry_delay(),
        }
    }

    /// Half of the token's validity window.
    pub fn half_life(&self, token: &BearerToken) -> Duration {
        total_lifetime(token).unwrap_or(self.fallback_lifetime) / 2
    }

    /// Whether a scheduled check should refresh: at or past the half-life.
    pub fn is_due(&self, token: &BearerToken, now: u64) -> bool {
        remaining_lifetime(token, now) <= self.half_life(token)
    }

    /// Delay until the next check, never past the token's actual expiry.
    pub fn next_interval(&self, token: &BearerToken, now: u64) -> Duration {
        self.half_life(token).min(remaining_lifetime(token, now))
    }

    /// Delay after a transient failure: the normal interval capped at the
    /// short retry, or the short retry alone once the token has expired.
    pub fn retry_interval(&self, token: Option<&BearerToken>, now: u64) -> Duration {
        match token.map(|t| self.next_interval(t, now)) {
            Some(d) if !d.is_zero() => d.min(self.retry_delay),
            _ => self.retry_delay,
        }
    }

    /// What to do at start, given the stored credentials.
    pub fn on_start(&self, token: Option<&BearerToken>, has_refresh_token: bool, now: u64) -> Plan {
        if !has_refresh_token {
            return Plan::Stop;
        }
        match token {
            Some(t) if !should_refresh(t, self.near_expiry, now) => {
                Plan::Arm(self.next_interval(t, now))
            }
            _ => Plan::RefreshNow,
        }
    }
}

/// Decision taken when the controller starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// No refresh token: halt without arming.
    Stop,
    /// Token is missing or near expiry.
    RefreshNow,
    /// Token is healthy; check again after the delay.
    Arm(Duration),
}

/// Floor a computed delay at [`MIN_TICK`].
pub fn clamp_tick(delay: Duration) -> Duration {
    delay.max(MIN_TICK)
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
