//! Mirrorsync watcher
//!
//! Run with: mirrorsync-watcher --source-dir ./data --remote-url http://peer:3000

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use mirrorsync::config::{expand_path, WatcherConfig};
use mirrorsync::logging::init_tracing;
use mirrorsync::server::{shutdown_signal, StatusServer};
use mirrorsync::sync::{DirectoryWatcher, SyncEngine};

/// How long shutdown waits for in-flight transfers
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "mirrorsync-watcher")]
#[command(about = "Watch a directory and mirror changed files to a receiver")]
#[command(version)]
struct Args {
    /// TOML config file; flags and env vars override its values
    #[arg(long, env = "MIRRORSYNC_CONFIG")]
    config: Option<String>,

    /// Directory tree to mirror
    #[arg(long, env = "MIRRORSYNC_SOURCE_DIR")]
    source_dir: Option<String>,

    /// Receiver base URL
    #[arg(long, env = "MIRRORSYNC_REMOTE_URL")]
    remote_url: Option<String>,

    /// Port for /health and /status (0 = disabled)
    #[arg(long, env = "MIRRORSYNC_STATUS_PORT")]
    status_port: Option<u16>,

    /// Debounce window in ms
    #[arg(long, env = "MIRRORSYNC_DEBOUNCE_MS")]
    debounce_ms: Option<u64>,

    /// Maximum scheduled-but-unfired operations
    #[arg(long, env = "MIRRORSYNC_MAX_PENDING")]
    max_pending: Option<usize>,

    /// Age in ms after which a pending operation is swept
    #[arg(long, env = "MIRRORSYNC_OPERATION_EXPIRY_MS")]
    operation_expiry_ms: Option<u64>,

    /// Staleness sweep period in ms
    #[arg(long, env = "MIRRORSYNC_SWEEP_INTERVAL_MS")]
    sweep_interval_ms: Option<u64>,

    /// Retries after the first attempt
    #[arg(long, env = "MIRRORSYNC_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Delay before the first retry in ms
    #[arg(long, env = "MIRRORSYNC_RETRY_BASE_MS")]
    retry_base_ms: Option<u64>,

    /// Per-attempt request timeout in ms
    #[arg(long, env = "MIRRORSYNC_REQUEST_TIMEOUT_MS")]
    request_timeout_ms: Option<u64>,

    /// Maximum simultaneous uploads
    #[arg(long, env = "MIRRORSYNC_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Ignore regex matched against relative paths (repeatable; replaces the defaults)
    #[arg(long = "ignore", env = "MIRRORSYNC_IGNORE", value_delimiter = ',')]
    ignore: Vec<String>,

    /// Push every existing file once at startup
    #[arg(long, env = "MIRRORSYNC_SYNC_ON_START")]
    sync_on_start: bool,

    /// Emit JSON logs
    #[arg(long, env = "MIRRORSYNC_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<WatcherConfig> {
        let mut config = match &self.config {
            Some(path) => WatcherConfig::from_toml_file(&expand_path(path)?)
                .with_context(|| format!("loading {}", path))?,
            None => WatcherConfig::default(),
        };

        if let Some(dir) = self.source_dir {
            config.source_dir = expand_path(&dir)?;
        }
        if let Some(url) = self.remote_url {
            config.remote_url = url;
        }
        if let Some(port) = self.status_port {
            config.status_port = port;
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_delay_ms = ms;
        }
        if let Some(n) = self.max_pending {
            config.max_pending_operations = n;
        }
        if let Some(ms) = self.operation_expiry_ms {
            config.operation_expiry_ms = ms;
        }
        if let Some(ms) = self.sweep_interval_ms {
            config.sweep_interval_ms = ms;
        }
        if let Some(n) = self.max_retries {
            config.max_retries = n;
        }
        if let Some(ms) = self.retry_base_ms {
            config.retry_base_delay_ms = ms;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout_ms = ms;
        }
        if let Some(n) = self.max_concurrent {
            config.max_concurrent_transfers = n;
        }
        if !self.ignore.is_empty() {
            config.ignore_patterns = self.ignore;
        }
        if self.sync_on_start {
            config.sync_on_start = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.into_config()?;
    let source: PathBuf = config.source_dir.clone();
    let engine = SyncEngine::with_http(config)
        .with_context(|| format!("initializing watcher for {}", source.display()))?;

    engine.start();
    let watcher = DirectoryWatcher::start(engine.clone())?;

    if engine.config().sync_on_start {
        let scheduled = engine.sync_existing()?;
        tracing::info!(scheduled, "Scheduled existing files");
    }

    let status_port = engine.config().status_port;
    if status_port > 0 {
        StatusServer::new(engine.clone(), status_port)
            .start(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    watcher.stop();
    engine.shutdown();
    if !engine.drain(DRAIN_TIMEOUT).await {
        tracing::warn!(
            in_flight = engine.in_flight_count(),
            "Transfers still in flight at exit"
        );
    }

    Ok(())
}
