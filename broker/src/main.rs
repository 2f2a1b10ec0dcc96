//! Binary entry point: CLI parsing, tracing setup, serve loop.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use engine_broker::config::BrokerConfig;
use engine_broker::{http, Broker};

#[derive(Parser)]
#[command(name = "engine-broker", version, about = "Chess analysis request broker")]
struct Args {
    /// TOML configuration file; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the HTTP API on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => BrokerConfig::from_toml_file(path).context("loading configuration")?,
        None => BrokerConfig::default(),
    };

    let broker = Broker::start(config);
    tokio::select! {
        served = http::serve(broker.clone(), args.listen) => served?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }
    broker.shutdown().await;
    Ok(())
}
