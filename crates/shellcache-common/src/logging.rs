//! Logging setup for the ShellCache binaries.
//!
//! Events go to stderr so that `shellcache fetch` can print response bodies
//! on stdout. The ShellCache crates log at the configured level while every
//! other target is held at `warn`, unless `RUST_LOG` or an explicit filter
//! says otherwise.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer, Registry,
};

/// Targets that follow [`LogConfig::level`].
const SHELLCACHE_TARGETS: &[&str] = &[
    "shellcache",
    "shellcache_common",
    "shellcache_net",
    "shellcache_sw",
];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Log span open/close (install, activate, each fetch) with source locations.
    pub lifecycle_spans: bool,
    /// Directives replacing the default filter, e.g. `shellcache_sw=trace,reqwest=debug`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from_verbosity(0)
    }
}

impl LogConfig {
    /// Map a `-v` count to a configuration: 0 = info, 1 = debug with
    /// lifecycle spans, 2+ = trace.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            format: LogFormat::default(),
            lifecycle_spans: verbosity > 0,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn default_directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        std::iter::once("warn".to_string())
            .chain(SHELLCACHE_TARGETS.iter().map(|target| format!("{target}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let custom = match self.filter {
            Some(ref directives) => EnvFilter::try_new(directives).ok(),
            None => EnvFilter::try_from_default_env().ok(),
        };
        custom.unwrap_or_else(|| EnvFilter::new(self.default_directives()))
    }
}

/// Install the global subscriber.
///
/// Fails if one is already installed.
pub fn init_logging(config: LogConfig) -> Result<(), TryInitError> {
    let spans = if config.lifecycle_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer().with_writer(std::io::stderr).with_span_events(spans);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => base
            .pretty()
            .with_file(config.lifecycle_spans)
            .with_line_number(config.lifecycle_spans)
            .boxed(),
        LogFormat::Compact => base.compact().with_target(config.lifecycle_spans).boxed(),
        LogFormat::Json => base.json().with_current_span(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(config.env_filter())
        .try_init()
}
