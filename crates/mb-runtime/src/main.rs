//! # Microbus Runtime
//!
//! Entry point: `MB_HOST=hello.example mb-runtime`.
//!
//! 1. Load the environment (process variables and `env.yaml` files)
//! 2. Initialise logs, traces and metrics
//! 3. Start the microservice
//! 4. Wait for Ctrl-C and shut down gracefully

use std::sync::Arc;

use anyhow::{Context, Result};
use mb_03_selective_tracing::TraceSelector;
use mb_04_connector::{Connector, EnvSource};
use mb_runtime::{Runtime, DEFAULT_HOST};
use mb_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let host = std::env::var("MB_HOST")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let telemetry = init_telemetry(TelemetryConfig::for_service(&host))
        .await
        .context("initialising telemetry")?;

    let cwd = std::env::current_dir().context("reading working directory")?;
    let env = EnvSource::from_process()?
        .discover(&cwd)
        .context("loading env.yaml")?;

    let con = Connector::new(&host);
    con.set_env(env)?;
    if let Some(selector) = telemetry.trace_selector() {
        let selector: Arc<dyn TraceSelector> = Arc::new(selector);
        con.set_trace_selector(selector);
    }

    let runtime = Runtime::new(con).await?;
    runtime.start().await?;

    info!("Microservice is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await?;
    drop(telemetry);
    Ok(())
}
