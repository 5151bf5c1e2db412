//! Watch Party - Sync Simulator
//!
//! Runs a host and several viewers against an in-process room store with
//! simulated channel delay, drifting player clocks and stalls, and shows how
//! well the group stays together.
//!
//! Usage:
//!   cargo run --release
//!   cargo run --release -- --viewers 5 --latency 300 --jitter 500
//!   cargo run --release -- --no-dashboard  # Plain logging mode

mod dashboard;
mod metrics;
mod sim;

use std::sync::Arc;
use parking_lot::RwLock;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let use_dashboard = !args.contains(&"--no-dashboard".to_string());
    let options = sim::SimOptions::from_args(&args);

    // Shared metrics state
    let metrics = Arc::new(RwLock::new(metrics::Metrics::new(
        options.latency.as_millis() as u64,
        options.jitter.as_millis() as u64,
    )));

    if use_dashboard {
        // Run with TUI dashboard
        dashboard::run(metrics, options).await
    } else {
        // Run with plain logging
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("watchparty_core=debug,watchparty_sim=info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();

        tokio::select! {
            result = sim::run(metrics, options) => result.map_err(Into::into),
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    }
}
