// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session controller: keeps the stored access token fresh.
//!
//! One scheduler task per [`SessionController::start`]. It waits out the
//! init delay, refreshes at once if the token is near expiry, then re-arms a
//! single timer after every check using the *current* token, since the token
//! may have been replaced out of band. Refresh calls are serialized by an
//! in-flight flag shared with [`SessionController::refresh_now`]. A rejected
//! refresh token fires the [`UnauthorizedHandler`] once and stops scheduling.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::RefreshError;
use crate::refresh::RefreshClient;
use crate::retry::RetryPolicy;
use crate::schedule::{clamp_tick, Plan, Policy, SchedulerState};
use crate::store::TokenStore;
use crate::token::{remaining_lifetime, BearerToken};

/// Why the session is being terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum LogoutReason {
    RefreshTokenExpired,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RefreshTokenExpired => f.write_str("refresh token expired"),
        }
    }
}

/// Forced-logout hook. The logout itself (clearing state, redirecting) is
/// the host's job.
pub trait UnauthorizedHandler: Send + Sync + 'static {
    fn handle_unauthorized(&self, reason: LogoutReason, details: &str);
}

impl<F> UnauthorizedHandler for F
where
    F: Fn(LogoutReason, &str) + Send + Sync + 'static,
{
    fn handle_unauthorized(&self, reason: LogoutReason, details: &str) {
        self(reason, details)
    }
}

/// Result of one refresh trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new token was stored.
    Refreshed,
    /// Another refresh was already in flight; nothing was done.
    Skipped,
    /// No refresh token is stored; scheduling has halted.
    NoRefreshToken,
    /// Retries were exhausted on a transient failure.
    Failed(RefreshError),
    /// The refresh token was rejected and the logout hook has fired.
    Unauthorized,
    /// The controller was stopped while the call was in flight; the result
    /// was dropped.
    Discarded,
    /// The controller is stopped or scheduling has halted; nothing was
    /// called. `start` again to resume.
    Halted,
}

/// Notifications broadcast by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Refreshed { expires_in_secs: u64 },
    #[serde(rename = "refresh:failed")]
    RefreshFailed { error: String },
    Unauthorized { reason: LogoutReason },
    Stopped { reason: String },
}

/// Clears the in-flight flag however the refresh ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionController {
    store: TokenStore,
    client: Arc<dyn RefreshClient>,
    on_unauthorized: Arc<dyn UnauthorizedHandler>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    retry: RetryPolicy,
    init_delay: Duration,
    in_flight: AtomicBool,
    stopped: AtomicBool,
    /// Bumped by every start; results from an older run are discarded.
    epoch: AtomicU64,
    /// Cancels the pending check of the current run.
    timer: Mutex<Option<CancellationToken>>,
    state_tx: watch::Sender<SchedulerState>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        config: &SessionConfig,
        store: TokenStore,
        client: Arc<dyn RefreshClient>,
        on_unauthorized: Arc<dyn UnauthorizedHandler>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        let (event_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            store,
            client,
            on_unauthorized,
            clock,
            policy: Policy::from_config(config),
            retry: RetryPolicy::from_config(config),
            init_delay: config.init_delay(),
            in_flight: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            timer: Mutex::new(None),
            state_tx,
            event_tx,
        })
    }

    /// Spawn the scheduler task. No-op if one is already running.
    pub fn start(self: &Arc<Self>) {
        let (epoch, cancel) = {
            let mut timer = self.timer.lock();
            if timer.is_some() {
                debug!("session controller already started");
                return;
            }
            let cancel = CancellationToken::new();
            *timer = Some(cancel.clone());
            self.stopped.store(false, Ordering::Release);
            self.set_state(SchedulerState::Idle);
            (self.epoch.fetch_add(1, Ordering::AcqRel) + 1, cancel)
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_schedule(epoch, cancel).await;
        });
        info!(epoch, "session controller started");
    }

    /// Cancel the pending check. An in-flight refresh is left to settle and
    /// its result is discarded.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(cancel) = self.timer.lock().take() {
            cancel.cancel();
        }
        if self.state() != SchedulerState::Stopped {
            self.set_state(SchedulerState::Idle);
        }
        info!("session controller stopped");
    }

    /// Refresh now, outside the schedule (e.g. after a 401 from the API).
    pub async fn refresh_now(&self) -> RefreshOutcome {
        if self.stopped.load(Ordering::Acquire) || self.state() == SchedulerState::Stopped {
            debug!("controller stopped, ignoring manual refresh");
            return RefreshOutcome::Halted;
        }
        self.refresh(self.epoch.load(Ordering::Acquire)).await
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn run_schedule(self: Arc<Self>, epoch: u64, cancel: CancellationToken) {
        if !self.init_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.init_delay) => {}
            }
        }

        let Some(mut delay) = self.startup_check(epoch).await else {
            return;
        };

        loop {
            if cancel.is_cancelled() {
                return;
            }
            let delay_armed = clamp_tick(delay);
            self.set_state(SchedulerState::Armed);
            debug!(delay_secs = delay_armed.as_secs(), "token check armed");

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay_armed) => {}
            }

            match self.scheduled_check(epoch).await {
                Some(next) => delay = next,
                None => return,
            }
        }
    }

    /// First inspection after the init delay. `None` means stop scheduling.
    async fn startup_check(&self, epoch: u64) -> Option<Duration> {
        let token = self.read_token();
        let has_refresh_token = self.store.refresh_token().is_some();
        let now = self.clock.now_secs();

        match self.policy.on_start(token.as_ref(), has_refresh_token, now) {
            Plan::Stop => {
                self.halt(epoch, "no refresh token");
                None
            }
            Plan::Arm(delay) => {
                info!(next_check_secs = delay.as_secs(), "session token healthy");
                Some(delay)
            }
            Plan::RefreshNow => {
                let remaining = token.as_ref().map(|t| remaining_lifetime(t, now).as_secs());
                info!(remaining_secs = ?remaining, "token near expiry at start, refreshing now");
                match self.refresh(epoch).await {
                    RefreshOutcome::Refreshed | RefreshOutcome::Skipped => {
                        Some(self.current_interval())
                    }
                    RefreshOutcome::Failed(_) => {
                        if self.store.refresh_token().is_some() {
                            Some(self.policy.retry_delay)
                        } else {
                            self.halt(epoch, "no refresh token");
                            None
                        }
                    }
                    RefreshOutcome::NoRefreshToken
                    | RefreshOutcome::Unauthorized
                    | RefreshOutcome::Discarded
                    | RefreshOutcome::Halted => None,
                }
            }
        }
    }

    /// A timer wake. Refreshes only once the token is past its half-life.
    async fn scheduled_check(&self, epoch: u64) -> Option<Duration> {
        if self.store.refresh_token().is_none() {
            self.halt(epoch, "no refresh token");
            return None;
        }

        let token = self.read_token();
        let now = self.clock.now_secs();
        let due = token.as_ref().map_or(true, |t| self.policy.is_due(t, now));
        if !due {
            debug!("token not yet at half-life, re-arming");
            return Some(self.current_interval());
        }

        match self.refresh(epoch).await {
            RefreshOutcome::Refreshed | RefreshOutcome::Skipped => Some(self.current_interval()),
            RefreshOutcome::Failed(_) => {
                let token = self.read_token();
                Some(self.policy.retry_interval(token.as_ref(), self.clock.now_secs()))
            }
            RefreshOutcome::NoRefreshToken
            | RefreshOutcome::Unauthorized
            | RefreshOutcome::Discarded
            | RefreshOutcome::Halted => None,
        }
    }

    async fn refresh(&self, epoch: u64) -> RefreshOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already in flight, skipping");
            return RefreshOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let Some(refresh_token) = self.store.refresh_token() else {
            self.halt(epoch, "no refresh token");
            return RefreshOutcome::NoRefreshToken;
        };

        if self.is_live(epoch) {
            self.set_state(SchedulerState::Refreshing);
        }
        let result = self.retry.run(|_| self.client.refresh(&refresh_token)).await;

        if !self.is_live(epoch) {
            debug!("controller stopped during refresh, discarding result");
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(token) => self.commit(token, epoch),
            Err(RefreshError::Unauthorized(details)) => {
                warn!(details = %details, "refresh token rejected, forcing logout");
                let reason = LogoutReason::RefreshTokenExpired;
                self.on_unauthorized.handle_unauthorized(reason, &details);
                let _ = self.event_tx.send(SessionEvent::Unauthorized { reason });
                self.halt(epoch, "refresh token rejected");
                RefreshOutcome::Unauthorized
            }
            Err(e) => {
                warn!(err = %e, "token refresh failed");
                let _ = self.event_tx.send(SessionEvent::RefreshFailed { error: e.to_string() });
                self.settle_state(epoch);
                RefreshOutcome::Failed(e)
            }
        }
    }

    fn commit(&self, token: BearerToken, epoch: u64) -> RefreshOutcome {
        if let Err(e) = self.store.set_access_token(&token) {
            warn!(err = %e, "failed to store refreshed token");
            let err = RefreshError::Transient(e.to_string());
            let _ = self.event_tx.send(SessionEvent::RefreshFailed { error: err.to_string() });
            self.settle_state(epoch);
            return RefreshOutcome::Failed(err);
        }

        let expires_in_secs = remaining_lifetime(&token, self.clock.now_secs()).as_secs();
        info!(expires_in_secs, "access token refreshed");
        let _ = self.event_tx.send(SessionEvent::Refreshed { expires_in_secs });
        self.settle_state(epoch);
        RefreshOutcome::Refreshed
    }

    /// Enter `Stopped` and drop the pending check, if `epoch` is still current.
    fn halt(&self, epoch: u64, reason: &str) {
        if !self.is_live(epoch) {
            return;
        }
        if let Some(cancel) = self.timer.lock().take() {
            cancel.cancel();
        }
        self.set_state(SchedulerState::Stopped);
        let _ = self.event_tx.send(SessionEvent::Stopped { reason: reason.to_owned() });
        info!(reason, "token refresh scheduling stopped");
    }

    /// After a non-terminal refresh: back to `Armed` while a run is active.
    fn settle_state(&self, epoch: u64) {
        if !self.is_live(epoch) {
            return;
        }
        let running = self.timer.lock().is_some();
        self.set_state(if running { SchedulerState::Armed } else { SchedulerState::Idle });
    }

    fn is_live(&self, epoch: u64) -> bool {
        !self.stopped.load(Ordering::Acquire) && self.epoch.load(Ordering::Acquire) == epoch
    }

    fn set_state(&self, next: SchedulerState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "scheduler state");
            *state = next;
            true
        });
    }

    fn read_token(&self) -> Option<BearerToken> {
        match self.store.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(err = %e, "stored access token unreadable, treating as expired");
                None
            }
        }
    }

    fn current_interval(&self) -> Duration {
        let now = self.clock.now_secs();
        self.read_token().map(|t| self.policy.next_interval(&t, now)).unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
