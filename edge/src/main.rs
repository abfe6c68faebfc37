use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use thermo_edge::{buffer::DEFAULT_CAPACITY, sensor::SimulatedAdc, DeliveryLoop, HttpDeliveryClient};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Reads the thermistor and forwards readings to the ingestor.
#[derive(Parser, Debug)]
#[command(name = "thermo-edge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Base URL of the ingestor.
    #[arg(long, env = "EDGE_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Shared key sent as X-API-Key.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: String,

    /// Sampling period in milliseconds.
    #[arg(long, env = "EDGE_INTERVAL_MS", default_value_t = 2000)]
    interval_ms: u64,

    /// Readings kept while the ingestor is unreachable.
    #[arg(long, env = "EDGE_BUFFER_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    buffer_capacity: usize,

    /// Resting ADC level of the simulated sensor.
    #[arg(long, env = "EDGE_SIM_CENTER", default_value_t = 128)]
    sim_center: u8,

    /// Probability that a simulated read fails.
    #[arg(long, env = "EDGE_SIM_FAILURE_RATE", default_value_t = 0.02)]
    sim_failure_rate: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if args.interval_ms == 0 {
        anyhow::bail!("EDGE_INTERVAL_MS must be greater than zero");
    }

    info!("Starting thermo-edge");
    info!(
        "Ingestor: {}, period: {}ms, buffer: {}",
        args.api_url, args.interval_ms, args.buffer_capacity
    );

    let client = HttpDeliveryClient::new(&args.api_url, args.api_key)
        .context("failed to build HTTP client")?;
    let source = SimulatedAdc::new(args.sim_center, args.sim_failure_rate);
    let delivery = DeliveryLoop::new(
        source,
        client,
        args.buffer_capacity,
        Duration::from_millis(args.interval_ms),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                on_signal.cancel();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    delivery.run(cancel).await.context("sensor failed")?;

    info!("thermo-edge stopped");
    Ok(())
}
