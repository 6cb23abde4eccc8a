//! Albor L2 loopback
//!
//! Runs one DRB through the gNB and UE user plane stacks (PDCP over RLC)
//! with the inter-slice scheduler granting the radio resources every slot.

mod config;
mod loopback;

use anyhow::Result;
use clap::Parser;
use config::LoopbackConfig;
use loopback::Loopback;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, or TOML with a .toml extension)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, overrides the configured levels
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run time in ms, overrides the configured duration
    #[arg(short, long)]
    duration_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => LoopbackConfig::from_file(path)?,
        None => LoopbackConfig::default(),
    };
    if args.duration_ms.is_some() {
        cfg.simulation.duration_ms = args.duration_ms;
    }

    // Initialize logging
    let directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| cfg.log.filter_directive());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor L2 loopback");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }
    info!(
        "Bearer: DRB{} lcid={} rlc={}",
        cfg.bearer.drb_id,
        cfg.bearer.lcid,
        cfg.bearer.rlc.mode()
    );
    info!(
        "Traffic: {} SDUs/ms of {} bytes, loss probability {}",
        cfg.simulation.sdus_per_ms, cfg.simulation.sdu_size, cfg.simulation.loss_probability
    );

    let mut loopback = Loopback::new(&cfg)?;

    // Wait for the configured run time or a shutdown signal
    tokio::select! {
        _ = loopback.run(cfg.simulation.duration_ms) => {
            info!("Simulation finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down L2 loopback");
    loopback.stop();
    println!("{}", serde_json::to_string_pretty(&loopback.report())?);

    Ok(())
}
