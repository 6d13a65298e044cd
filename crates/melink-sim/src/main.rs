//! Standalone ME-series ECU simulator
//!
//! Listens on a TCP socket and serves the full device command table
//! with synthetic telemetry, so clients can be developed and tested
//! without hardware.

use anyhow::Context;
use clap::Parser;
use melink_core::definitions::DefinitionStore;
use melink_core::sim::Simulator;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "melink-sim", about, version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:54321", env = "MELINK_SIM_LISTEN")]
    listen: String,

    /// Definition catalog to seed the device from (JSON array); the
    /// built-in demo catalog is used when omitted
    #[arg(long, env = "MELINK_SIM_CATALOG")]
    catalog: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let catalog = match &args.catalog {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            DefinitionStore::from_json_str(&json)
                .with_context(|| format!("parsing catalog {}", path.display()))?
        }
        None => DefinitionStore::demo(),
    };
    info!(objects = catalog.len(), "catalog loaded");

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;

    Simulator::new(catalog)
        .serve(listener)
        .await
        .context("simulator stopped")?;
    Ok(())
}
