// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single storage path for session credentials.
//!
//! The access token lives in one cookie cell when it fits, otherwise in a
//! chunk set, and is mirrored to every configured domain. The refresh token
//! stays on the primary domain.

use crate::config::SessionConfig;
use crate::cookie::{chunk, CookieStore, Scope};
use crate::error::ChunkError;
use crate::token::BearerToken;

pub struct TokenStore {
    cookies: CookieStore,
    token_cookie: String,
    refresh_cookie: String,
    chunk_chars: usize,
}

impl TokenStore {
    pub fn new(cookies: CookieStore, config: &SessionConfig) -> Self {
        Self {
            cookies,
            token_cookie: config.token_cookie.clone(),
            refresh_cookie: config.refresh_cookie.clone(),
            chunk_chars: config.chunk_chars,
        }
    }

    /// Read the access token. A chunk set takes precedence over a plain cell.
    pub fn access_token(&self) -> Result<Option<BearerToken>, ChunkError> {
        if let Some(value) = chunk::decode(&self.cookies, &self.token_cookie)? {
            return Ok(Some(BearerToken::new(value)));
        }
        Ok(self.cookies.get(&self.token_cookie).filter(|v| !v.is_empty()).map(BearerToken::new))
    }

    /// Replace the access token, chunking it when it exceeds one cell.
    pub fn set_access_token(&self, token: &BearerToken) -> Result<(), ChunkError> {
        if token.char_len() > self.chunk_chars {
            let chunks = chunk::encode(
                &self.cookies,
                &self.token_cookie,
                token.as_str(),
                self.chunk_chars,
                Scope::Mirrored,
            )?;
            self.cookies.remove(&self.token_cookie)?;
            tracing::debug!(chunks, "stored chunked access token");
        } else {
            if self.chunk_chars == 0 {
                return Err(ChunkError::ZeroChunkSize);
            }
            self.cookies.set(&self.token_cookie, token.as_str(), Scope::Mirrored)?;
            chunk::clear(&self.cookies, &self.token_cookie)?;
        }
        Ok(())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.cookies.get(&self.refresh_cookie).filter(|v| !v.is_empty())
    }

    pub fn set_refresh_token(&self, value: &str) -> anyhow::Result<()> {
        self.cookies.set(&self.refresh_cookie, value, Scope::Primary)
    }

    /// Remove every cell this store owns, on every domain.
    pub fn clear(&self) -> anyhow::Result<()> {
        chunk::clear(&self.cookies, &self.token_cookie)?;
        self.cookies.remove(&self.token_cookie)?;
        self.cookies.remove(&self.refresh_cookie)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
