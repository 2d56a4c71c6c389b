// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tempo-session: keeps a dashboard session's bearer token fresh.

pub mod clock;
pub mod config;
pub mod controller;
pub mod cookie;
pub mod error;
pub mod refresh;
pub mod retry;
pub mod schedule;
pub mod store;
pub mod test_support;
pub mod token;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::SystemClock;
use crate::config::DaemonConfig;
use crate::controller::{LogoutReason, SessionController};
use crate::cookie::jar::FileJar;
use crate::cookie::{CookieOptions, CookieStore};
use crate::refresh::HttpRefreshClient;
use crate::schedule::SchedulerState;
use crate::store::TokenStore;

/// Why [`run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Shutdown was requested.
    Shutdown,
    /// The refresh token was rejected; stored credentials were cleared.
    LoggedOut,
    /// Scheduling stopped because no refresh token is stored.
    Halted,
}

impl RunExit {
    pub fn code(self) -> i32 {
        match self {
            Self::Shutdown => 0,
            Self::LoggedOut => 3,
            Self::Halted => 4,
        }
    }
}

/// Run the daemon until SIGTERM/SIGINT or the session ends.
pub async fn run(config: DaemonConfig) -> anyhow::Result<RunExit> {
    let shutdown = CancellationToken::new();

    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                    sd.cancel();
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                    sd.cancel();
                }
            }
        });
    }

    run_until(config, shutdown).await
}

/// Run the daemon until `shutdown` fires or the session ends.
pub async fn run_until(
    config: DaemonConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<RunExit> {
    let session = &config.session;
    let jar = Arc::new(FileJar::open(&config.jar)?);
    let cookies = CookieStore::new(
        jar,
        CookieOptions { domain: session.cookie_domain.clone(), ..CookieOptions::default() },
        session.mirror_domains.clone(),
    );
    let store = TokenStore::new(cookies, session);
    let client = HttpRefreshClient::new(config.refresh_url.clone(), config.http_timeout())?;

    let logout = CancellationToken::new();
    let on_unauthorized = {
        let logout = logout.clone();
        move |reason: LogoutReason, details: &str| {
            warn!(%reason, details, "session ended by refresh endpoint");
            logout.cancel();
        }
    };

    let controller = SessionController::new(
        session,
        store,
        Arc::new(client),
        Arc::new(on_unauthorized),
        Arc::new(SystemClock),
    );
    let mut state_rx = controller.watch_state();

    info!(
        jar = %config.jar.display(),
        refresh_url = %config.refresh_url,
        mirrors = session.mirror_domains.len(),
        "tempo-session starting"
    );
    controller.start();

    let exit = tokio::select! {
        biased;
        _ = logout.cancelled() => RunExit::LoggedOut,
        _ = shutdown.cancelled() => RunExit::Shutdown,
        result = state_rx.wait_for(|s| *s == SchedulerState::Stopped) => {
            // The logout hook fires before the state change.
            if result.is_ok() && logout.is_cancelled() {
                RunExit::LoggedOut
            } else {
                RunExit::Halted
            }
        }
    };

    controller.stop();
    if exit == RunExit::LoggedOut {
        match controller.store().clear() {
            Ok(()) => info!("stored credentials cleared"),
            Err(e) => warn!(err = %e, "failed to clear stored credentials"),
        }
    }
    info!(?exit, "tempo-session exiting");
    Ok(exit)
}
