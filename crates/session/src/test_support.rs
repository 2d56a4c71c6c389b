// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token builders, scripted refresh client,
//! recording logout handler, and a clock that follows tokio's paused time.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::controller::{LogoutReason, UnauthorizedHandler};
use crate::cookie::jar::MemoryJar;
use crate::cookie::{CookieJar, CookieOptions, CookieStore};
use crate::error::RefreshError;
use crate::refresh::RefreshClient;
use crate::store::TokenStore;
use crate::token::BearerToken;

/// Assert that an expression returns `Err` whose message contains `$substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Build an unsigned JWT with the given timing claims.
pub fn jwt(iat: Option<u64>, exp: Option<u64>) -> BearerToken {
    let mut claims = serde_json::Map::new();
    claims.insert("sub".to_owned(), "user-1".into());
    if let Some(iat) = iat {
        claims.insert("iat".to_owned(), iat.into());
    }
    if let Some(exp) = exp {
        claims.insert("exp".to_owned(), exp.into());
    }
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::Value::Object(claims).to_string());
    BearerToken::new(format!("{header}.{payload}.c2lnbmF0dXJl"))
}

/// A token valid for `total` seconds of which `remaining` are left at `now`.
pub fn lifetime_token(now: u64, total: u64, remaining: u64) -> BearerToken {
    let exp = now + remaining;
    jwt(Some(exp - total), Some(exp))
}

/// Clock anchored at `base` epoch seconds that advances with tokio time,
/// so paused-time tests can move token lifetimes forward.
pub struct PausedClock {
    base: u64,
    start: tokio::time::Instant,
}

impl PausedClock {
    pub fn new(base: u64) -> Arc<Self> {
        Arc::new(Self { base, start: tokio::time::Instant::now() })
    }
}

impl Clock for PausedClock {
    fn now_secs(&self) -> u64 {
        self.base + self.start.elapsed().as_secs()
    }
}

/// Refresh client that replays a fixed script of outcomes.
///
/// Once the script runs out every call fails transiently.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<BearerToken, RefreshError>>>,
    latency: Duration,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    call_times: Mutex<Vec<tokio::time::Instant>>,
    tokens_seen: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<BearerToken, RefreshError>>) -> Arc<Self> {
        Self::with_latency(script, Duration::ZERO)
    }

    pub fn with_latency(
        script: Vec<Result<BearerToken, RefreshError>>,
        latency: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            latency,
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            call_times: Mutex::new(vec![]),
            tokens_seen: Mutex::new(vec![]),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.call_times.lock().clone()
    }

    /// Refresh tokens presented to the client, in call order.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().clone()
    }
}

impl RefreshClient for ScriptedClient {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BearerToken, RefreshError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().push(tokio::time::Instant::now());
            self.tokens_seen.lock().push(refresh_token.to_owned());
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let outcome = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(RefreshError::Transient("script exhausted".to_owned())));

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }
}

/// Logout handler that records every invocation.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(LogoutReason, String)>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(LogoutReason, String)> {
        self.calls.lock().clone()
    }
}

impl UnauthorizedHandler for RecordingHandler {
    fn handle_unauthorized(&self, reason: LogoutReason, details: &str) {
        self.calls.lock().push((reason, details.to_owned()));
    }
}

/// In-memory jar whose writes can be switched to fail, like a read-only disk.
#[derive(Default)]
pub struct FlakyJar {
    inner: MemoryJar,
    fail_writes: AtomicBool,
}

impl FlakyJar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("read-only file system");
        }
        Ok(())
    }
}

impl CookieJar for FlakyJar {
    fn get(&self, name: &str, options: &CookieOptions) -> Option<String> {
        self.inner.get(name, options)
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) -> anyhow::Result<()> {
        self.check()?;
        self.inner.set(name, value, options)
    }

    fn remove(&self, name: &str, options: &CookieOptions) -> anyhow::Result<()> {
        self.check()?;
        self.inner.remove(name, options)
    }
}

/// Token store over a fresh in-memory jar, configured from `config`.
pub fn memory_store(config: &SessionConfig) -> (Arc<MemoryJar>, TokenStore) {
    let jar = Arc::new(MemoryJar::new());
    let cookies = CookieStore::new(
        jar.clone(),
        CookieOptions { domain: config.cookie_domain.clone(), ..CookieOptions::default() },
        config.mirror_domains.clone(),
    );
    (jar, TokenStore::new(cookies, config))
}

/// Session config with no init delay, for timer-driven tests.
pub fn fast_config() -> SessionConfig {
    SessionConfig { init_delay_ms: 0, ..SessionConfig::default() }
}
