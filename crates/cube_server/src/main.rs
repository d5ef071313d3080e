use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use cube_common::config::CubeConfig;
use cube_server::http::{run_server, ServerState};
use cube_storage::engine::CubeEngine;
use cube_txn::{start_sweeper, TxnManager};

#[derive(Parser, Debug)]
#[command(name = "cube", about = "Cube: sharded transactional key-value store")]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "cube.toml")]
    config: String,

    /// HTTP listen address (overrides config and PORT).
    #[arg(long)]
    listen_addr: Option<String>,

    /// Data directory (overrides config and DATA_DIR).
    #[arg(long)]
    data_dir: Option<String>,

    /// Metrics listen address.
    #[arg(long, default_value = "0.0.0.0:9090")]
    metrics_addr: String,

    /// Disable the Prometheus metrics exporter.
    #[arg(long)]
    no_metrics: bool,

    /// Print the default configuration as TOML and exit.
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --print-default-config: dump default TOML and exit
    if cli.print_default_config {
        let default_config = CubeConfig::default();
        let toml_str = toml::to_string_pretty(&default_config)
            .unwrap_or_else(|e| format!("# failed to serialize default config: {}", e));
        println!("{}", toml_str);
        return Ok(());
    }

    cube_observability::init_tracing();
    tracing::info!("Starting Cube...");

    let mut config = load_config(&cli.config);

    // Environment overrides: PORT replaces the listen port, DATA_DIR the
    // storage directory. CLI flags win over both.
    if let Ok(port) = std::env::var("PORT") {
        let host = config
            .server
            .listen_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.listen_addr = format!("{host}:{port}");
    }
    if let Ok(dir) = std::env::var("DATA_DIR") {
        config.storage.data_dir = dir;
    }
    if let Some(ref addr) = cli.listen_addr {
        config.server.listen_addr = addr.clone();
    }
    if let Some(ref dir) = cli.data_dir {
        config.storage.data_dir = dir.clone();
    }

    tracing::info!("Config: {:?}", config);

    if !cli.no_metrics {
        if let Err(e) = cube_observability::init_metrics(&cli.metrics_addr) {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    // Boot the storage engine: per-shard WAL replay and filter warm-up.
    let engine = Arc::new(CubeEngine::open(&config)?);

    let txns = Arc::new(TxnManager::with_stale_timeout(
        engine.clone(),
        Duration::from_secs(config.txn.stale_txn_timeout_secs),
    ));
    let sweeper = start_sweeper(
        txns.clone(),
        Duration::from_secs(config.txn.sweep_interval_secs.max(1)),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr).await?;
    tracing::info!(
        "Cube ready on http://{} ({} shards)",
        config.server.listen_addr,
        cube_common::SHARD_COUNT
    );

    let state = Arc::new(ServerState::new(engine.clone(), txns.clone()));
    run_server(listener, state.clone(), async {
        let reason = wait_for_shutdown_signal().await;
        tracing::info!("{}, initiating graceful shutdown", reason);
    })
    .await;

    // Drain: give in-flight requests a bounded window to finish.
    let drain_timeout = Duration::from_secs(config.server.shutdown_drain_timeout_secs.max(1));
    let drain_started = std::time::Instant::now();
    while state.active_connections() > 0 && drain_started.elapsed() < drain_timeout {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if state.active_connections() > 0 {
        tracing::warn!(
            "drain timeout elapsed with {} connections still active",
            state.active_connections()
        );
    }

    sweeper.stop().await;
    engine.shutdown();
    tracing::info!("Cube stopped");

    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, returning a description of which signal fired.
async fn wait_for_shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())
            .unwrap_or_else(|e| panic!("Failed to register SIGTERM handler: {}", e));
        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT (Ctrl+C) received",
            _ = sigterm.recv() => "SIGTERM received",
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT (Ctrl+C) received"
    }
}

fn load_config(path: &str) -> CubeConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("Failed to parse config {}: {}, using defaults", path, e);
                CubeConfig::default()
            }
        },
        Err(_) => {
            tracing::info!("Config file {} not found, using defaults", path);
            CubeConfig::default()
        }
    }
}
