//! tallyd: the tally collection server.
//!
//! Opens the metric repository (Postgres, snapshot file or memory), serves
//! the HTTP API until Ctrl-C, then closes the repository so the final
//! snapshot is written.
//!
//! # Usage
//!
//! ```text
//! tallyd -a localhost:8080 -i 300 -f /tmp/metrics-db.json -r true
//! tallyd -d postgres://tally@localhost/metrics -k secret -l warn
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::SigningCodec;
use tally_store::StoreConfig;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "tallyd", about = "tally metrics server")]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, env = "ADDRESS", default_value = "localhost:8080")]
    address: String,

    /// Snapshot interval in seconds; 0 writes after every update.
    #[arg(short = 'i', long, env = "STORE_INTERVAL", default_value = "300")]
    store_interval: u64,

    /// Snapshot file. Empty disables file storage.
    #[arg(short, long, env = "FILE_STORAGE_PATH", default_value = "/tmp/metrics-db.json")]
    file_storage_path: String,

    /// Load the snapshot file on start.
    #[arg(short, long, env = "RESTORE", default_value = "true", action = ArgAction::Set)]
    restore: bool,

    /// Postgres connection string. Takes precedence over the snapshot file.
    #[arg(short, long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// HMAC key for verifying requests and signing responses.
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// Log filter used when `RUST_LOG` is unset, e.g. `warn` or `tally=trace`.
    #[arg(short, long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database_url: self.database_dsn.clone(),
            file_path: Some(PathBuf::from(&self.file_storage_path)),
            store_interval: Duration::from_secs(self.store_interval),
            restore: self.restore,
            ..StoreConfig::default()
        }
    }
}

fn log_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::new("info,tally=debug,tallyd=debug"),
    };
    Ok(filter)
}

fn init_tracing(filter: EnvFilter, format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(log_filter(cli.log_level.as_deref())?, cli.log_format);

    let repo = tally_store::open(&cli.store_config()).await?;
    info!(backend = repo.backend_name(), "repository opened");

    let signer = SigningCodec::from_key(cli.key.as_deref());
    let router = tally_api::build_router(repo.clone(), signer);

    let listener = tokio::net::TcpListener::bind(&cli.address).await?;
    info!(addr = %listener.local_addr()?, "tally server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    repo.close().await?;
    info!("tally server stopped");
    Ok(())
}
