//! Gateway configuration and the static asset manifest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use shellcache_net::UrlPattern;
use url::Url;

use crate::ServiceWorkerError;

/// Shell assets pre-cached at install: root document, script bundle,
/// stylesheet, app manifest, two icons and the backend SDK.
pub const DEFAULT_SHELL_ASSETS: &[&str] = &[
    "./",
    "./index.html",
    "./app.js",
    "./styles.css",
    "./manifest.json",
    "./icons/icon-192.png",
    "./icons/icon-512.png",
    "https://cdn.jsdelivr.net/npm/@supabase/supabase-js@2",
];

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prefix of the generation name, e.g. `working-hours-tracker`.
    pub cache_prefix: Option<String>,

    /// Version token. Changing it invalidates every older generation.
    pub version: String,

    /// Base URL the manifest entries are resolved against.
    pub scope: String,

    /// Asset manifest, absolute or relative to `scope`.
    pub manifest: Vec<String>,

    /// Requests matching this pattern go to the network first.
    pub backend: UrlPattern,

    /// Activate right after a successful install.
    pub skip_waiting: bool,

    /// Storage-wide byte limit for cached bodies.
    pub quota_bytes: Option<u64>,

    /// Where the cache storage snapshot is kept between runs.
    pub storage_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_prefix: Some("working-hours-tracker".to_string()),
            version: "v1".to_string(),
            scope: "http://localhost:8080/".to_string(),
            manifest: DEFAULT_SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            backend: UrlPattern::domain("supabase.co"),
            skip_waiting: true,
            quota_bytes: None,
            storage_path: None,
        }
    }
}

impl GatewayConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ServiceWorkerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub async fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&json)
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> String {
        match self.cache_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}-{}", prefix, self.version),
            _ => self.version.clone(),
        }
    }

    /// Parsed scope URL.
    pub fn scope_url(&self) -> Result<Url, ServiceWorkerError> {
        Url::parse(&self.scope)
            .map_err(|e| ServiceWorkerError::Config(format!("invalid scope {:?}: {}", self.scope, e)))
    }

    /// Check the configuration and resolve the manifest.
    pub fn validate(&self) -> Result<AssetManifest, ServiceWorkerError> {
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::Config("version token is empty".to_string()));
        }
        if self.version.chars().any(char::is_whitespace) {
            return Err(ServiceWorkerError::Config(format!(
                "version token {:?} contains whitespace",
                self.version
            )));
        }
        AssetManifest::resolve(&self.scope_url()?, &self.manifest)
    }
}

/// Ordered, resolved list of URLs pre-cached at install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    urls: Vec<Url>,
}

impl AssetManifest {
    /// Resolve manifest entries against `scope`. Duplicates keep their
    /// first position.
    pub fn resolve(scope: &Url, entries: &[String]) -> Result<Self, ServiceWorkerError> {
        let mut urls: Vec<Url> = Vec::with_capacity(entries.len());
        for entry in entries {
            let url = scope
                .join(entry)
                .map_err(|e| ServiceWorkerError::InvalidManifest {
                    entry: entry.clone(),
                    reason: e.to_string(),
                })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ServiceWorkerError::InvalidManifest {
                    entry: entry.clone(),
                    reason: format!("unsupported scheme {}", url.scheme()),
                });
            }
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        Ok(Self { urls })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.urls.iter()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.urls.contains(url)
    }
}
