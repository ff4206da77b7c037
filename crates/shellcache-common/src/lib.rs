//! # ShellCache Common
//!
//! Error types and logging configuration shared by the ShellCache crates.
//!
//! ## Features
//!
//! - Unified error type with categories and exit codes
//! - Logging configuration and setup
//! - Option extension trait

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type surfaced by the ShellCache adapters.
#[derive(Error, Debug)]
pub enum ShellCacheError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Install did not complete.
    #[error("Install error: {message}")]
    Install {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Lifecycle state errors.
    #[error("State error: {0}")]
    State(String),

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl ShellCacheError {
    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create an install error with source.
    pub fn install_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Install {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if the host may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShellCacheError::Network { .. } | ShellCacheError::Install { .. } | ShellCacheError::Io(_)
        )
    }

    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            ShellCacheError::Network { .. } => "network",
            ShellCacheError::Cache { .. } => "cache",
            ShellCacheError::Install { .. } => "install",
            ShellCacheError::State(_) => "state",
            ShellCacheError::Config { .. } => "config",
            ShellCacheError::Io(_) => "io",
            ShellCacheError::NotFound(_) => "not_found",
        }
    }

    /// Process exit code for command-line adapters.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellCacheError::Config { .. } => 2,
            ShellCacheError::Install { .. } => 3,
            ShellCacheError::Network { .. } => 4,
            ShellCacheError::NotFound(_) => 5,
            _ => 1,
        }
    }
}

/// Result type alias for ShellCache operations.
pub type Result<T> = std::result::Result<T, ShellCacheError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| ShellCacheError::NotFound(resource.into()))
    }
}
