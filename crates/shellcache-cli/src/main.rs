//! Command-line host for the ShellCache offline gateway.
//!
//! Drives the install, activate and fetch handlers against the real network
//! and keeps cache generations in a JSON snapshot between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the shell and activate the new generation
//! shellcache --config shell.json install
//!
//! # Route a request through the gateway
//! shellcache --config shell.json fetch https://app.example.com/index.html
//!
//! # Show what is cached
//! shellcache --config shell.json list
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use shellcache_common::{init_logging, LogConfig, LogFormat, OptionExt, ShellCacheError};
use shellcache_net::{LoaderConfig, Request, ResourceLoader};
use shellcache_sw::{CacheStorage, GatewayConfig, ShellCacheGateway};
use tracing::{error, info};

const DEFAULT_STORE: &str = "shellcache-store.json";

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline cache gateway for single-page application shells")]
struct Cli {
    /// Gateway configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache storage snapshot, overrides `storage_path` from the config
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the manifest into the current generation and activate it
    Install {
        /// Leave the new generation waiting instead of activating it
        #[arg(long)]
        no_activate: bool,
    },

    /// Route one request through the gateway
    Fetch {
        /// Request URL
        url: String,
        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// Print only the status line, not the body
        #[arg(long)]
        head: bool,
    },

    /// List cache generations and their entries
    List {
        /// Only show this generation
        #[arg(short, long)]
        generation: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    if let Err(e) = init_logging(LogConfig::from_verbosity(cli.verbose).with_format(format)) {
        eprintln!("shellcache: logging disabled: {e}");
    }

    if let Err(err) = run(cli).await {
        error!(category = err.category(), retryable = err.is_retryable(), "{err}");
        eprintln!("shellcache: {err}");
        std::process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> shellcache_common::Result<()> {
    let config = load_config(cli.config.as_deref()).await?;
    let store = store_path(cli.store.as_deref(), &config);
    let storage = CacheStorage::load_or_default(&store, config.quota_bytes).await?;

    match cli.command {
        Commands::Install { no_activate } => {
            let (gateway, _events) = build_gateway(&config, storage)?;
            gateway.install().await?;
            println!(
                "Installed {} ({} assets)",
                gateway.cache_name(),
                gateway.manifest().len()
            );
            if !no_activate {
                for name in gateway.activate().await? {
                    println!("Deleted {name}");
                }
                println!("Activated {}", gateway.cache_name());
            }
            save(&gateway, &store).await?;
        }

        Commands::Fetch { url, method, head } => {
            let request = Request::parse(&method, &url)?;
            let (gateway, _events) = build_gateway(&config, storage)?;
            gateway.start().await?;
            save(&gateway, &store).await?;

            let outcome = gateway.handle_fetch(&request).await;
            save(&gateway, &store).await?;
            let response = outcome?;
            let source = if response.from_cache { "cache" } else { "network" };
            println!(
                "{} {} ({} bytes, from {})",
                response.status,
                response.url,
                response.body().len(),
                source
            );
            if !head {
                match response.text() {
                    Ok(text) if response.is_text() => println!("{text}"),
                    _ => println!("<{} bytes of binary data>", response.body().len()),
                }
            }
        }

        Commands::List { generation } => {
            let names: Vec<String> = match generation {
                Some(name) => {
                    storage.get(&name).ok_or_not_found(&name)?;
                    vec![name]
                }
                None => storage.keys().into_iter().map(str::to_string).collect(),
            };
            if names.is_empty() {
                println!("No cache generations in {}", store.display());
            }
            for name in names {
                let Some(cache) = storage.get(&name) else {
                    continue;
                };
                let marker = if name == config.cache_name() { " (current)" } else { "" };
                println!("{name}{marker}: {} entries, {} bytes", cache.len(), cache.size_bytes());
                for key in cache.keys() {
                    println!("  {key}");
                }
            }
        }
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> shellcache_common::Result<GatewayConfig> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            GatewayConfig::load(path).await.map_err(|e| {
                ShellCacheError::config_with_source(format!("cannot load {}", path.display()), e)
            })?
        }
        None => GatewayConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn store_path(flag: Option<&Path>, config: &GatewayConfig) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.storage_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE))
}

fn build_gateway(
    config: &GatewayConfig,
    storage: CacheStorage,
) -> shellcache_common::Result<(
    ShellCacheGateway,
    tokio::sync::mpsc::UnboundedReceiver<shellcache_sw::ServiceWorkerEvent>,
)> {
    let loader = ResourceLoader::new(LoaderConfig::default())?;
    Ok(ShellCacheGateway::new(config, Arc::new(loader), storage.shared())?)
}

async fn save(gateway: &ShellCacheGateway, store: &Path) -> shellcache_common::Result<()> {
    let caches = gateway.caches();
    let storage = caches.read().await;
    storage.save(store).await?;
    Ok(())
}
