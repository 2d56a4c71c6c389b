// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chunked cookie values.
//!
//! A value longer than one cell is stored as `{key}0 .. {key}{n-1}` plus a
//! control cell `{key}_totalChunks` holding `n`. Sizes are counted in
//! characters, and a character is never split across cells.

use crate::cookie::{CookieStore, Scope};
use crate::error::ChunkError;

pub fn count_cell(key: &str) -> String {
    format!("{key}_totalChunks")
}

pub fn chunk_cell(key: &str, index: usize) -> String {
    format!("{key}{index}")
}

/// Split `value` into pieces of at most `max_chars` characters.
///
/// An empty value yields a single empty piece.
pub fn split(value: &str, max_chars: usize) -> Result<Vec<&str>, ChunkError> {
    if max_chars == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in value.char_indices() {
        if count == max_chars {
            pieces.push(&value[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < value.len() || pieces.is_empty() {
        pieces.push(&value[start..]);
    }
    Ok(pieces)
}

/// Write `value` as a chunk set under `key`, returning the chunk count.
///
/// Chunks are written before the count cell. Cells past the new count, left
/// over from a longer previous value or stray, are removed afterwards.
pub fn encode(
    store: &CookieStore,
    key: &str,
    value: &str,
    max_chars: usize,
    scope: Scope,
) -> Result<usize, ChunkError> {
    let pieces = split(value, max_chars)?;
    let previous = stored_count(store, key).unwrap_or(0);

    for (index, piece) in pieces.iter().enumerate() {
        store.set(&chunk_cell(key, index), piece, scope)?;
    }
    store.set(&count_cell(key), &pieces.len().to_string(), scope)?;

    remove_tail(store, key, pieces.len(), previous)?;
    tracing::trace!(key, chunks = pieces.len(), "encoded chunked cookie");
    Ok(pieces.len())
}

/// Reassemble the chunk set under `key`.
///
/// `Ok(None)` when there is no count cell. A count cell that names a missing
/// chunk fails the whole read rather than returning a partial value.
pub fn decode(store: &CookieStore, key: &str) -> Result<Option<String>, ChunkError> {
    let Some(raw) = store.get(&count_cell(key)) else {
        return Ok(None);
    };
    let expected = match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => return Err(ChunkError::InvalidCount { key: key.to_owned(), raw }),
    };

    let mut value = String::new();
    for index in 0..expected {
        let piece = store.get(&chunk_cell(key, index)).ok_or_else(|| {
            ChunkError::CorruptChunkSet { key: key.to_owned(), expected, missing: index }
        })?;
        value.push_str(&piece);
    }
    if store.get(&chunk_cell(key, expected)).is_some() {
        tracing::warn!(key, expected, "stray chunk cell past the count, ignoring it");
    }
    Ok(Some(value))
}

/// Remove the count cell, every chunk it names, and any stray chunk after them.
pub fn clear(store: &CookieStore, key: &str) -> Result<(), ChunkError> {
    let Some(count) = stored_count(store, key) else {
        return Ok(());
    };
    remove_tail(store, key, 0, count)?;
    store.remove(&count_cell(key))?;
    Ok(())
}

fn stored_count(store: &CookieStore, key: &str) -> Option<usize> {
    store.get(&count_cell(key)).map(|raw| raw.trim().parse::<usize>().unwrap_or(0))
}

/// Remove chunk cells from `from` on: every index below `known`, then any
/// contiguous run of stray cells after it.
fn remove_tail(
    store: &CookieStore,
    key: &str,
    from: usize,
    known: usize,
) -> Result<(), ChunkError> {
    let mut index = from;
    while index < known || store.get(&chunk_cell(key, index)).is_some() {
        store.remove(&chunk_cell(key, index))?;
        index += 1;
    }
    Ok(())
}

#[cfg(test)]
#[path = "chunk_tests.rs"]
mod tests;
