//! Worker configuration.
//!
//! A [`WorkerConfig`] is built once when the worker starts and shared by
//! `Arc` with every component that needs it. It also owns the cache naming
//! scheme `<prefix>-<category>-<version>`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use agrimarket_common::{AgriError, RetryConfig};
use agrimarket_net::{UrlPart, UrlPattern};
use serde::{Deserialize, Serialize};

/// Cache namespace category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    /// App shell, scripts, styles, documents.
    Static,
    /// API and backend responses.
    Data,
    /// Image resources.
    Images,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [CacheCategory::Static, CacheCategory::Data, CacheCategory::Images];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Static => "static",
            CacheCategory::Data => "data",
            CacheCategory::Images => "images",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = AgriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(CacheCategory::Static),
            "data" => Ok(CacheCategory::Data),
            "images" => Ok(CacheCategory::Images),
            other => Err(AgriError::InvalidArgument(format!("unknown cache category '{other}'"))),
        }
    }
}

/// The three cache names of one worker generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub static_cache: String,
    pub data: String,
    pub images: String,
}

impl CacheNames {
    pub fn get(&self, category: CacheCategory) -> &str {
        match category {
            CacheCategory::Static => &self.static_cache,
            CacheCategory::Data => &self.data,
            CacheCategory::Images => &self.images,
        }
    }

    pub fn all(&self) -> [&str; 3] {
        [&self.static_cache, &self.data, &self.images]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.all().contains(&name)
    }
}

/// Immutable worker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Application prefix shared by every cache this worker owns.
    pub cache_prefix: String,

    /// Version token of the running worker generation.
    pub version: String,

    /// Paths pre-cached into the static namespace on install.
    pub precache_manifest: Vec<String>,

    /// Path prefix of backend data requests.
    pub data_path_prefix: String,

    /// Substring identifying the managed backend host.
    pub backend_host_marker: String,

    /// Path substrings that are never cached (backend data, hot-module
    /// reload).
    pub no_cache_path_markers: Vec<String>,

    /// Host substrings that are never cached.
    pub no_cache_host_markers: Vec<String>,

    /// Additional no-cache regexes, matched against the full URL.
    pub extra_no_cache_patterns: Vec<String>,

    /// Message carried by the JSON offline response.
    pub offline_message: String,

    /// How many times a failing background sync is attempted.
    pub sync_retry_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "agrimarket".to_string(),
            version: "v3.0.0".to_string(),
            precache_manifest: [
                "/",
                "/index.html",
                "/manifest.json",
                "/favicon.ico",
                "/robots.txt",
                "/placeholder.svg",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            data_path_prefix: "/api/".to_string(),
            backend_host_marker: "supabase.co".to_string(),
            no_cache_path_markers: vec!["/api/".to_string(), "hot-update".to_string()],
            no_cache_host_markers: vec!["supabase.co".to_string()],
            extra_no_cache_patterns: Vec::new(),
            offline_message: "You are offline. Check your connection and try again.".to_string(),
            sync_retry_attempts: 3,
        }
    }
}

impl WorkerConfig {
    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> agrimarket_common::Result<Self> {
        let config: WorkerConfig = serde_json::from_str(json)
            .map_err(|e| AgriError::config_with_source("invalid worker config JSON", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> agrimarket_common::Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            AgriError::config_with_source(format!("cannot read {}", path.display()), e)
        })?;
        Self::from_json(&json)
    }

    /// Check the invariants the cache naming and routing rely on.
    pub fn validate(&self) -> agrimarket_common::Result<()> {
        if self.cache_prefix.is_empty() || self.cache_prefix.chars().any(char::is_whitespace) {
            return Err(AgriError::config("cache_prefix must be non-empty without whitespace"));
        }
        if self.version.is_empty() || self.version.chars().any(char::is_whitespace) {
            return Err(AgriError::config("version must be non-empty without whitespace"));
        }
        let markers = [
            ("data_path_prefix", std::slice::from_ref(&self.data_path_prefix)),
            ("backend_host_marker", std::slice::from_ref(&self.backend_host_marker)),
            ("no_cache_path_markers", self.no_cache_path_markers.as_slice()),
            ("no_cache_host_markers", self.no_cache_host_markers.as_slice()),
        ];
        for (field, values) in markers {
            // An empty marker would match every URL.
            if values.iter().any(String::is_empty) {
                return Err(AgriError::config(format!("{field} must not contain empty markers")));
            }
        }
        if let Some(bad) = self.precache_manifest.iter().find(|p| !p.starts_with('/')) {
            return Err(AgriError::config(format!(
                "precache entry '{bad}' must be an absolute path"
            )));
        }
        for pattern in &self.extra_no_cache_patterns {
            UrlPattern::regex(UrlPart::Full, pattern)
                .map_err(|e| AgriError::config_with_source("invalid no-cache pattern", e))?;
        }
        Ok(())
    }

    /// Name of the current cache for a category.
    pub fn cache_name(&self, category: CacheCategory) -> String {
        format!("{}-{}-{}", self.cache_prefix, category, self.version)
    }

    /// Names of the three current caches.
    pub fn cache_names(&self) -> CacheNames {
        CacheNames {
            static_cache: self.cache_name(CacheCategory::Static),
            data: self.cache_name(CacheCategory::Data),
            images: self.cache_name(CacheCategory::Images),
        }
    }

    /// Whether a cache name belongs to this application, whatever its
    /// generation.
    pub fn owns_cache(&self, name: &str) -> bool {
        name.strip_prefix(&self.cache_prefix)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Split one of this application's cache names into category and
    /// version.
    pub fn parse_cache_name(&self, name: &str) -> Option<(CacheCategory, String)> {
        let rest = name.strip_prefix(&self.cache_prefix)?.strip_prefix('-')?;
        let (category, version) = rest.split_once('-')?;
        if version.is_empty() {
            return None;
        }
        let category = category.parse().ok()?;
        Some((category, version.to_string()))
    }

    /// Whether a cache name belongs to this application but to another
    /// generation.
    pub fn is_stale_cache(&self, name: &str) -> bool {
        self.owns_cache(name) && !self.cache_names().contains(name)
    }

    /// Whether a path is part of the install-time manifest.
    pub fn is_precached_path(&self, path: &str) -> bool {
        self.precache_manifest.iter().any(|p| p == path)
    }

    /// Retry policy the host applies to failing background syncs.
    pub fn sync_retry(&self) -> RetryConfig {
        RetryConfig::attempts(self.sync_retry_attempts)
    }
}
