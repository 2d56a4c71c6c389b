// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Failure reading a chunked cookie value. Decoding is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The count cell names more chunks than are present.
    #[error("corrupt chunk set {key}: expected {expected} chunks, cell {missing} is missing")]
    CorruptChunkSet { key: String, expected: usize, missing: usize },

    /// The count cell does not hold a positive integer.
    #[error("invalid chunk count for {key}: {raw:?}")]
    InvalidCount { key: String, raw: String },

    /// A chunk size of zero cannot encode anything.
    #[error("chunk size must be at least 1")]
    ZeroChunkSize,

    /// The jar refused a write.
    #[error("cookie jar write failed: {0}")]
    Jar(String),
}

impl From<anyhow::Error> for ChunkError {
    fn from(e: anyhow::Error) -> Self {
        Self::Jar(format!("{e:#}"))
    }
}

/// Failure of a single token refresh call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// The refresh token itself was rejected. Retrying cannot help.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Timeout, 5xx, connection failure or an unexpected response shape.
    #[error("transient: {0}")]
    Transient(String),
}

impl RefreshError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Transient(_) => "TRANSIENT",
        }
    }
}
