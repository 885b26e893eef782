//! tally-agent: samples this host and reports to a tally server.
//!
//! # Usage
//!
//! ```text
//! tally-agent -a localhost:8080 -p 2 -r 10 -k secret
//! ```

use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use tally_agent::{Agent, AgentConfig, SystemSampler};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "tally-agent", about = "tally metrics agent")]
struct Cli {
    /// Address of the tally server.
    #[arg(short, long, env = "ADDRESS", default_value = "localhost:8080")]
    address: String,

    /// Poll interval in seconds.
    #[arg(short, long, env = "POLL_INTERVAL", default_value = "2")]
    poll_interval: u64,

    /// Report interval in seconds. Must be a multiple of the poll interval.
    #[arg(short, long, env = "REPORT_INTERVAL", default_value = "10")]
    report_interval: u64,

    /// HMAC key for signing reports.
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// Send report bodies uncompressed.
    #[arg(long)]
    no_gzip: bool,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn config(&self) -> AgentConfig {
        AgentConfig {
            address: self.address.clone(),
            poll_interval: Duration::from_secs(self.poll_interval),
            report_interval: Duration::from_secs(self.report_interval),
            key: self.key.clone().filter(|k| !k.is_empty()),
            gzip: !self.no_gzip,
            ..AgentConfig::default()
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tally=debug,tally_agent=debug".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.config();
    let mut agent = Agent::from_config(&config, Box::new(SystemSampler::new()))?;
    info!(
        address = %config.address,
        signed = config.key.is_some(),
        gzip = config.gzip,
        "tally agent starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for ctrl-c, running until killed");
                std::future::pending::<()>().await;
            }
        }
    });

    agent.run(shutdown_rx).await;
    Ok(())
}
