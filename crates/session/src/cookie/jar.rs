// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cookie jar implementations: in-memory, and a JSON file shared with the host.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::clock::epoch_secs;
use crate::cookie::{CookieJar, CookieOptions};

/// One physical cookie cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub value: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    /// Expiry as epoch seconds. Session cookie when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// Cells keyed by `(domain, name)`.
#[derive(Debug, Default, Clone)]
struct CookieMap {
    cells: BTreeMap<(Option<String>, String), StoredCookie>,
}

impl CookieMap {
    fn from_cookies(cookies: Vec<StoredCookie>) -> Self {
        let cells = cookies.into_iter().map(|c| ((c.domain.clone(), c.name.clone()), c)).collect();
        Self { cells }
    }

    fn into_cookies(self) -> Vec<StoredCookie> {
        self.cells.into_values().collect()
    }

    fn get(&self, name: &str, options: &CookieOptions, now: u64) -> Option<String> {
        let cell = self.cells.get(&(options.domain.clone(), name.to_owned()))?;
        match cell.expires_at {
            Some(at) if at <= now => None,
            _ => Some(cell.value.clone()),
        }
    }

    fn set(&mut self, name: &str, value: &str, options: &CookieOptions, now: u64) {
        let key = (options.domain.clone(), name.to_owned());
        if options.max_age == Some(0) {
            self.cells.remove(&key);
            return;
        }
        let cell = StoredCookie {
            name: name.to_owned(),
            domain: options.domain.clone(),
            value: value.to_owned(),
            path: options.path.clone(),
            secure: options.secure,
            expires_at: options.max_age.map(|s| now.saturating_add(s)),
        };
        self.cells.insert(key, cell);
    }

    fn remove(&mut self, name: &str, options: &CookieOptions) -> bool {
        self.cells.remove(&(options.domain.clone(), name.to_owned())).is_some()
    }
}

/// In-process jar.
#[derive(Debug, Default)]
pub struct MemoryJar {
    inner: Mutex<CookieMap>,
}

impl MemoryJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every physical cell as `(domain, name, value)`, ordered by domain then name.
    pub fn cells(&self) -> Vec<(Option<String>, String, String)> {
        self.inner
            .lock()
            .cells
            .values()
            .map(|c| (c.domain.clone(), c.name.clone(), c.value.clone()))
            .collect()
    }
}

impl CookieJar for MemoryJar {
    fn get(&self, name: &str, options: &CookieOptions) -> Option<String> {
        self.inner.lock().get(name, options, epoch_secs())
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) -> anyhow::Result<()> {
        self.inner.lock().set(name, value, options, epoch_secs());
        Ok(())
    }

    fn remove(&self, name: &str, options: &CookieOptions) -> anyhow::Result<()> {
        self.inner.lock().remove(name, options);
        Ok(())
    }
}

/// On-disk jar format.
#[derive(Debug, Default, Serialize, Deserialize)]
struct JarFile {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

/// Jar persisted as JSON, re-read on every access so writes made by the host
/// are observed.
///
/// Each write is write-tmp-then-rename under a process-local lock, which keeps
/// single cells atomic. Other processes writing the same file are not locked out.
pub struct FileJar {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileJar {
    /// Open (and validate, if present) the jar at `path`.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if path.exists() {
            load(&path)?;
        }
        Ok(Self { path, lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> CookieMap {
        match load(&self.path) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "failed to read cookie jar");
                CookieMap::default()
            }
        }
    }

    /// Read-modify-write. An unreadable file fails the write instead of being
    /// replaced by a map holding only this change.
    fn update(&self, apply: impl FnOnce(&mut CookieMap) -> bool) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut map = load(&self.path)?;
        if !apply(&mut map) {
            return Ok(());
        }
        save(&self.path, map).map_err(|e| {
            tracing::warn!(path = %self.path.display(), err = %e, "failed to write cookie jar");
            e.context(format!("write {}", self.path.display()))
        })
    }
}

impl CookieJar for FileJar {
    fn get(&self, name: &str, options: &CookieOptions) -> Option<String> {
        let _guard = self.lock.lock();
        self.read_map().get(name, options, epoch_secs())
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) -> anyhow::Result<()> {
        self.update(|map| {
            map.set(name, value, options, epoch_secs());
            true
        })
    }

    fn remove(&self, name: &str, options: &CookieOptions) -> anyhow::Result<()> {
        self.update(|map| map.remove(name, options))
    }
}

fn load(path: &Path) -> anyhow::Result<CookieMap> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CookieMap::default()),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(CookieMap::default());
    }
    let file: JarFile = serde_json::from_str(&contents)?;
    Ok(CookieMap::from_cookies(file.cookies))
}

/// Save atomically (write tmp + rename).
///
/// The temp name carries PID and a counter so concurrent saves never share a
/// `.tmp` file.
fn save(path: &Path, map: CookieMap) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(&JarFile { cookies: map.into_cookies() })?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "jar_tests.rs"]
mod tests;
