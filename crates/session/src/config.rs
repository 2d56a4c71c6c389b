// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Default access-token cookie name.
pub const DEFAULT_TOKEN_COOKIE: &str = "token";

/// Default refresh-token cookie name.
pub const DEFAULT_REFRESH_COOKIE: &str = "refreshToken";

/// Default maximum characters stored in a single cookie cell.
pub const DEFAULT_CHUNK_CHARS: usize = 4000;

/// Tuning knobs for the session lifecycle (field → env var → compiled default).
#[derive(Debug, Clone, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay before the first token inspection, in milliseconds.
    #[arg(long, default_value_t = 1000, env = "TEMPO_INIT_DELAY_MS")]
    pub init_delay_ms: u64,

    /// Refresh immediately at start when the token expires within this many seconds.
    #[arg(long, default_value_t = 300, env = "TEMPO_NEAR_EXPIRY_SECS")]
    pub near_expiry_secs: u64,

    /// Retries after the first failed refresh call.
    #[arg(long, default_value_t = 3, env = "TEMPO_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Base backoff between refresh retries, in milliseconds.
    #[arg(long, default_value_t = 1000, env = "TEMPO_BASE_BACKOFF_MS")]
    pub base_backoff_ms: u64,

    /// Short bounded retry after a transient refresh failure, in seconds.
    #[arg(long, default_value_t = 30, env = "TEMPO_RETRY_DELAY_SECS")]
    pub retry_delay_secs: u64,

    /// Lifetime assumed when a token lacks `iat`/`exp`, in seconds.
    #[arg(long, default_value_t = 24 * 3600, env = "TEMPO_FALLBACK_LIFETIME_SECS")]
    pub fallback_lifetime_secs: u64,

    /// Maximum characters per cookie cell before the token is chunked.
    #[arg(long, default_value_t = DEFAULT_CHUNK_CHARS, env = "TEMPO_CHUNK_CHARS")]
    pub chunk_chars: usize,

    /// Access-token cookie name.
    #[arg(long, default_value = DEFAULT_TOKEN_COOKIE, env = "TEMPO_TOKEN_COOKIE")]
    pub token_cookie: String,

    /// Refresh-token cookie name.
    #[arg(long, default_value = DEFAULT_REFRESH_COOKIE, env = "TEMPO_REFRESH_COOKIE")]
    pub refresh_cookie: String,

    /// Domain of the primary cookie copy. Host-only when unset.
    #[arg(long, env = "TEMPO_COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    /// Extra domains that receive a copy of the access token (comma-separated).
    #[arg(long, value_delimiter = ',', env = "TEMPO_MIRROR_DOMAINS")]
    pub mirror_domains: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_delay_ms: 1000,
            near_expiry_secs: 300,
            max_attempts: 3,
            base_backoff_ms: 1000,
            retry_delay_secs: 30,
            fallback_lifetime_secs: 24 * 3600,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            token_cookie: DEFAULT_TOKEN_COOKIE.to_owned(),
            refresh_cookie: DEFAULT_REFRESH_COOKIE.to_owned(),
            cookie_domain: None,
            mirror_domains: vec![],
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_chars == 0 {
            anyhow::bail!("--chunk-chars must be at least 1");
        }
        if self.token_cookie.is_empty() || self.refresh_cookie.is_empty() {
            anyhow::bail!("cookie names must not be empty");
        }
        if self.token_cookie == self.refresh_cookie {
            anyhow::bail!("--token-cookie and --refresh-cookie must differ");
        }
        if self.fallback_lifetime_secs == 0 {
            anyhow::bail!("--fallback-lifetime-secs must be positive");
        }
        Ok(())
    }

    pub fn init_delay(&self) -> Duration {
        Duration::from_millis(self.init_delay_ms)
    }

    pub fn near_expiry(&self) -> Duration {
        Duration::from_secs(self.near_expiry_secs)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn fallback_lifetime(&self) -> Duration {
        Duration::from_secs(self.fallback_lifetime_secs)
    }
}

/// Keeps a dashboard session alive by refreshing its bearer token.
#[derive(Debug, Parser)]
#[command(name = "tempo-session", version, about)]
pub struct DaemonConfig {
    /// Cookie jar file shared with the host.
    #[arg(long, env = "TEMPO_JAR")]
    pub jar: PathBuf,

    /// Token refresh endpoint.
    #[arg(long, env = "TEMPO_REFRESH_URL")]
    pub refresh_url: String,

    /// HTTP request timeout for the refresh call, in seconds.
    #[arg(long, default_value_t = 30, env = "TEMPO_HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: u64,

    /// Log format (json or text).
    #[arg(long, env = "TEMPO_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TEMPO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(flatten)]
    pub session: SessionConfig,
}

impl DaemonConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.session.validate()?;
        if !self.refresh_url.starts_with("http://") && !self.refresh_url.starts_with("https://") {
            anyhow::bail!("--refresh-url must be an http(s) URL");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
