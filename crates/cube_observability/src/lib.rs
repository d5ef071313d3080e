//! Observability setup: structured logging and Prometheus metrics.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber with structured logging.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cube=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Initialize the Prometheus metrics exporter on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record a completed command (GET/SET/BEGIN/COMMIT/ROLLBACK or parse error).
pub fn record_command_metrics(duration_us: u64, command: &str, success: bool) {
    metrics::counter!("cube_commands_total", "command" => command.to_string(), "success" => success.to_string()).increment(1);
    metrics::histogram!("cube_command_duration_us", "command" => command.to_string())
        .record(duration_us as f64);
}

/// Record a transaction lifecycle event: begin, commit, conflict, rollback.
pub fn record_txn_metrics(action: &str) {
    metrics::counter!("cube_txn_total", "action" => action.to_string()).increment(1);
}

/// Record active HTTP connection count.
pub fn record_active_connections(count: usize) {
    metrics::gauge!("cube_active_connections").set(count as f64);
}
