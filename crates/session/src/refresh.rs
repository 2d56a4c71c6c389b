// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The refresh network call.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RefreshError;
use crate::token::BearerToken;

/// Exchanges a refresh token for a new access token.
///
/// Object-safe for use as `Arc<dyn RefreshClient>`.
pub trait RefreshClient: Send + Sync + 'static {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BearerToken, RefreshError>> + Send + 'a>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// The only accepted success shape.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    token: Option<String>,
}

/// POSTs `{"refreshToken": ...}` as JSON and expects `{"token": ...}` back.
pub struct HttpRefreshClient {
    http: reqwest::Client,
    url: String,
}

impl HttpRefreshClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn do_refresh(&self, refresh_token: &str) -> Result<BearerToken, RefreshError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RefreshError::Transient(format!("HTTP error: {e}")))?;

        let status = resp.status();
        let body =
            resp.text().await.map_err(|e| RefreshError::Transient(format!("read body: {e}")))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(RefreshError::Unauthorized(format!("HTTP {status}: {body}")));
        }
        if !status.is_success() {
            return Err(RefreshError::Transient(format!("HTTP {status}: {body}")));
        }

        let parsed: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::Transient(format!("parse response: {e}")))?;
        match parsed.token {
            Some(token) if !token.is_empty() => Ok(BearerToken::new(token)),
            _ => Err(RefreshError::Transient("response carried no token".to_owned())),
        }
    }
}

impl RefreshClient for HttpRefreshClient {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<BearerToken, RefreshError>> + Send + 'a>> {
        Box::pin(self.do_refresh(refresh_token))
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
