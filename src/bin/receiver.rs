//! Mirrorsync receiver
//!
//! Run with: mirrorsync-receiver --destination-dir ./mirror --port 3000

use anyhow::Context;
use clap::Parser;

use mirrorsync::config::{expand_path, ReceiverConfig};
use mirrorsync::logging::init_tracing;
use mirrorsync::server::{shutdown_signal, ReceiverServer, ReceiverState};

#[derive(Parser, Debug)]
#[command(name = "mirrorsync-receiver")]
#[command(about = "Receive mirrored files and write them under a destination tree")]
#[command(version)]
struct Args {
    /// TOML config file; flags and env vars override its values
    #[arg(long, env = "MIRRORSYNC_CONFIG")]
    config: Option<String>,

    /// Root of the mirror tree
    #[arg(long, env = "MIRRORSYNC_DEST_DIR")]
    destination_dir: Option<String>,

    /// Listen port
    #[arg(long, env = "MIRRORSYNC_PORT")]
    port: Option<u16>,

    /// Directory uploads are spooled to before verification
    #[arg(long, env = "MIRRORSYNC_STAGING_DIR")]
    staging_dir: Option<String>,

    /// Request body limit in bytes
    #[arg(long, env = "MIRRORSYNC_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// Emit JSON logs
    #[arg(long, env = "MIRRORSYNC_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ReceiverConfig> {
        let mut config = match &self.config {
            Some(path) => ReceiverConfig::from_toml_file(&expand_path(path)?)
                .with_context(|| format!("loading {}", path))?,
            None => ReceiverConfig::default(),
        };

        if let Some(dir) = self.destination_dir {
            config.destination_dir = expand_path(&dir)?;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = self.staging_dir {
            config.staging_dir = Some(expand_path(&dir)?);
        }
        if let Some(limit) = self.max_upload_bytes {
            config.max_upload_bytes = limit;
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
    let state = ReceiverState::from_config(&config).with_context(|| {
        format!(
            "preparing destination {}",
            config.destination_dir.display()
        )
    })?;
    tracing::info!(
        destination = %state.handler().root().display(),
        staging = %config.staging_dir().display(),
        "Receiver ready"
    );

    ReceiverServer::new(state, config.port, config.max_upload_bytes)
        .start(shutdown_signal())
        .await?;

    tracing::info!("Receiver stopped");
    Ok(())
}
