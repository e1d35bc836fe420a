//! Engine configuration management.
//!
//! This module handles loading and saving the engine configuration: the
//! application origin, the two namespace names, the API path prefix and the
//! app-shell asset manifest.
//!
//! Configuration is stored at `~/.config/offline-shell/config.json`. Any field
//! can be overridden from the environment (`OFFLINE_SHELL_*`).

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "offline-shell";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Bump the suffix on every deployment that changes the app shell; the old
/// namespace is then pruned on activation.
const DEFAULT_STATIC_CACHE: &str = "static-cache-v1";

const DEFAULT_RUNTIME_CACHE: &str = "runtime-cache";

const DEFAULT_API_PREFIX: &str = "/api/";

const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/index.js",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

const ENV_ORIGIN: &str = "OFFLINE_SHELL_ORIGIN";
const ENV_STATIC_CACHE: &str = "OFFLINE_SHELL_STATIC_CACHE";
const ENV_RUNTIME_CACHE: &str = "OFFLINE_SHELL_RUNTIME_CACHE";
const ENV_API_PREFIX: &str = "OFFLINE_SHELL_API_PREFIX";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub origin: Url,
    pub static_cache: String,
    pub runtime_cache: String,
    pub api_prefix: String,
    pub manifest: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
            static_cache: DEFAULT_STATIC_CACHE.to_string(),
            runtime_cache: DEFAULT_RUNTIME_CACHE.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl EngineConfig {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    pub fn with_static_cache(mut self, name: impl Into<String>) -> Self {
        self.static_cache = name.into();
        self
    }

    pub fn with_runtime_cache(mut self, name: impl Into<String>) -> Self {
        self.runtime_cache = name.into();
        self
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn with_manifest<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Load from the config file, falling back to defaults, then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        let config = config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Apply `OFFLINE_SHELL_*` overrides read through `lookup`.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = Url::parse(&origin)
                .with_context(|| format!("{} is not a valid URL: {}", ENV_ORIGIN, origin))?;
        }
        if let Some(name) = lookup(ENV_STATIC_CACHE) {
            self.static_cache = name;
        }
        if let Some(name) = lookup(ENV_RUNTIME_CACHE) {
            self.runtime_cache = name;
        }
        if let Some(prefix) = lookup(ENV_API_PREFIX) {
            self.api_prefix = prefix;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            bail!("origin must be http or https: {}", self.origin);
        }
        if self.static_cache.is_empty() || self.runtime_cache.is_empty() {
            bail!("cache names must not be empty");
        }
        if self.static_cache == self.runtime_cache {
            bail!(
                "static and runtime caches must have distinct names: {}",
                self.static_cache
            );
        }
        if !self.api_prefix.starts_with('/') {
            bail!("API prefix must start with '/': {}", self.api_prefix);
        }
        if self.manifest.is_empty() {
            bail!("asset manifest must not be empty");
        }
        Ok(())
    }

    /// Namespace names considered current; everything else is pruned on activation.
    pub fn version_set(&self) -> BTreeSet<String> {
        [self.static_cache.clone(), self.runtime_cache.clone()]
            .into_iter()
            .collect()
    }

    /// Lookup order for cache-first requests.
    pub fn lookup_order(&self) -> [&str; 2] {
        [&self.static_cache, &self.runtime_cache]
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    pub fn is_api_path(&self, url: &Url) -> bool {
        url.path().starts_with(&self.api_prefix)
    }

    /// Resolve an origin-relative manifest path to an absolute URL.
    pub fn resolve(&self, path: &str) -> Result<Url, url::ParseError> {
        self.origin.join(path)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
