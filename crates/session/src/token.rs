// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer token inspection.
//!
//! Claims are read from the JWT payload *without* signature verification.
//! This only decides when to refresh ahead of expiry; the server stays the
//! authority on whether a token is valid.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// An access token as issued by the server. Replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters, the unit cookie cells are bounded by.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }

    /// Best-effort read of the `iat`/`exp` claims. Unreadable payloads yield
    /// empty claims.
    pub fn claims(&self) -> Claims {
        decode_claims(&self.0).unwrap_or_default()
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BearerToken({} chars)", self.char_len())
    }
}

/// Timing claims carried by a token, in epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Claims {
    pub issued_at: Option<u64>,
    pub expires_at: Option<u64>,
}

fn decode_claims(raw: &str) -> Option<Claims> {
    let payload = raw.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    Some(Claims { issued_at: numeric_claim(&value, "iat"), expires_at: numeric_claim(&value, "exp") })
}

// NumericDate may be fractional; negative values are treated as absent.
fn numeric_claim(value: &serde_json::Value, name: &str) -> Option<u64> {
    let claim = value.get(name)?;
    claim.as_u64().or_else(|| claim.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Time left before `exp`. Missing or invalid claims count as already expired.
pub fn remaining_lifetime(token: &BearerToken, now: u64) -> Duration {
    match token.claims().expires_at {
        Some(exp) => Duration::from_secs(exp.saturating_sub(now)),
        None => Duration::ZERO,
    }
}

/// The full validity window `exp - iat`, if both claims are present and ordered.
pub fn total_lifetime(token: &BearerToken) -> Option<Duration> {
    let Claims { issued_at, expires_at } = token.claims();
    let (iat, exp) = (issued_at?, expires_at?);
    exp.checked_sub(iat).map(Duration::from_secs)
}

pub fn should_refresh(token: &BearerToken, threshold: Duration, now: u64) -> bool {
    remaining_lifetime(token, now) <= threshold
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
