// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cookie storage: the host jar primitive, and a store that mirrors one
//! logical value across several cookie domains.

pub mod chunk;
pub mod jar;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Attributes applied to a cookie cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    /// Cookie domain. `None` is host-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
    /// Lifetime in seconds. Session cookie when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

fn default_path() -> String {
    "/".to_owned()
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self { domain: None, path: default_path(), secure: false, same_site: None, max_age: None }
    }
}

impl CookieOptions {
    /// Same attributes, scoped to another domain.
    pub fn for_domain(&self, domain: &str) -> Self {
        Self { domain: Some(domain.to_owned()), ..self.clone() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Host cookie primitive: one cell, one domain per call.
///
/// Single-cell operations must be atomic. Nothing spans cells. A write that
/// did not persist is an error, never a silent no-op.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str, options: &CookieOptions) -> Option<String>;

    fn set(&self, name: &str, value: &str, options: &CookieOptions) -> anyhow::Result<()>;

    fn remove(&self, name: &str, options: &CookieOptions) -> anyhow::Result<()>;
}

/// Whether a write goes to the primary domain only or to every mirror too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Primary,
    Mirrored,
}

/// Cookie access with optional fan-out to additional domains.
///
/// A mirrored value has one physical copy per domain, so [`CookieStore::remove`]
/// always clears every configured domain.
#[derive(Clone)]
pub struct CookieStore {
    jar: Arc<dyn CookieJar>,
    options: CookieOptions,
    mirror_domains: Vec<String>,
}

impl CookieStore {
    pub fn new(jar: Arc<dyn CookieJar>, options: CookieOptions, mirror_domains: Vec<String>) -> Self {
        // The primary domain is written anyway; never double-write it.
        let mirror_domains = mirror_domains
            .into_iter()
            .filter(|d| !d.is_empty() && Some(d.as_str()) != options.domain.as_deref())
            .collect();
        Self { jar, options, mirror_domains }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.jar.get(name, &self.options)
    }

    pub fn set(&self, name: &str, value: &str, scope: Scope) -> anyhow::Result<()> {
        self.jar.set(name, value, &self.options)?;
        if scope == Scope::Mirrored {
            for domain in &self.mirror_domains {
                self.jar.set(name, value, &self.options.for_domain(domain))?;
            }
        }
        Ok(())
    }

    /// Remove `name` everywhere. Every domain is attempted; the first failure
    /// is returned.
    pub fn remove(&self, name: &str) -> anyhow::Result<()> {
        let mut result = self.jar.remove(name, &self.options);
        for domain in &self.mirror_domains {
            let removed = self.jar.remove(name, &self.options.for_domain(domain));
            if result.is_ok() {
                result = removed;
            }
        }
        result
    }

    pub fn mirror_domains(&self) -> &[String] {
        &self.mirror_domains
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
