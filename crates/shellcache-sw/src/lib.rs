//! # ShellCache Service Worker
//!
//! Offline cache gateway for a single-page application shell.
//!
//! ## Features
//!
//! - **Lifecycle**: install, activate and fetch handlers driven by the host
//! - **Cache generations**: one named, versioned generation is current
//! - **Routing**: network-first for backend calls, cache-first for shell assets
//! - **Clients**: open pages are claimed on activation
//! - **Persistence**: generations survive process restarts
//!
//! ## Architecture
//!
//! ```text
//! ShellCacheGateway
//!     ├── GatewayConfig ── AssetManifest
//!     ├── Fetcher (network)
//!     ├── Clients
//!     └── CacheStorage (shared)
//!             └── Cache "<prefix>-<version>"
//!                     └── URL → CacheEntry
//! ```

use serde::{Deserialize, Serialize};
use shellcache_common::ShellCacheError;
use shellcache_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod gateway;

pub use cache::{cache_key, Cache, CacheEntry, CacheStorage, SharedCacheStorage};
pub use clients::{Client, ClientId, Clients};
pub use config::{AssetManifest, GatewayConfig, DEFAULT_SHELL_ASSETS};
pub use gateway::ShellCacheGateway;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed fetching {url}: {source}")]
    InstallFailed {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Invalid manifest entry {entry:?}: {reason}")]
    InvalidManifest { entry: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Network(#[from] NetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ServiceWorkerError> for ShellCacheError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(e) => e.into(),
            ServiceWorkerError::Io(e) => ShellCacheError::Io(e),
            ServiceWorkerError::StateError(msg) => ShellCacheError::State(msg),
            ServiceWorkerError::NotFound(what) => ShellCacheError::NotFound(what),
            e @ ServiceWorkerError::InstallFailed { .. } => {
                ShellCacheError::install_with_source("install did not complete", e)
            }
            e @ (ServiceWorkerError::InvalidManifest { .. }
            | ServiceWorkerError::Config(_)
            | ServiceWorkerError::Serialization(_)) => {
                ShellCacheError::config_with_source("invalid gateway configuration", e)
            }
            e @ (ServiceWorkerError::CacheError(_) | ServiceWorkerError::QuotaExceeded { .. }) => {
                ShellCacheError::cache(e.to_string())
            }
        }
    }
}

// ==================== Types ====================

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceWorkerState {
    /// Constructed, install not yet run.
    #[default]
    Parsed,
    /// Pre-caching the manifest.
    Installing,
    /// Generation populated, waiting for activation.
    Installed,
    /// Sweeping old generations and claiming clients.
    Activating,
    /// Active and controlling requests.
    Activated,
    /// Install failed; a new install attempt may be made.
    Redundant,
}

/// Events emitted by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// Lifecycle state changed.
    StateChange {
        generation: String,
        new_state: ServiceWorkerState,
    },
    /// An old generation was removed during activation.
    GenerationDeleted { name: String },
    /// A client is now controlled by a different generation.
    ControllerChange {
        client_id: ClientId,
        generation: String,
    },
    /// A write-through cache write was dropped.
    CacheWriteFailed { url: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_default() {
        assert_eq!(ServiceWorkerState::default(), ServiceWorkerState::Parsed);
    }

    #[test]
    fn test_error_conversion_keeps_category() {
        let err: ShellCacheError = ServiceWorkerError::StateError("not installed".into()).into();
        assert_eq!(err.category(), "state");

        let err: ShellCacheError =
            ServiceWorkerError::Network(NetError::RequestFailed("offline".into())).into();
        assert_eq!(err.category(), "network");

        let err: ShellCacheError = ServiceWorkerError::InstallFailed {
            url: "https://app.example.com/app.js".into(),
            source: NetError::RequestFailed("offline".into()),
        }
        .into();
        assert_eq!(err.category(), "install");

        let err: ShellCacheError = ServiceWorkerError::QuotaExceeded {
            needed: 10,
            available: 1,
        }
        .into();
        assert_eq!(err.category(), "cache");
    }
}
