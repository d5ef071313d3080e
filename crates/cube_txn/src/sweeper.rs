//! Background stale-transaction sweeper.
//!
//! A transaction abandoned mid-flight (client gone, connection dropped)
//! would otherwise pin its session forever. The sweeper periodically reaps
//! transactions whose BEGIN is older than the configured timeout; a reaped
//! transaction behaves exactly as if the client had issued ROLLBACK.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::manager::TxnManager;

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the sweep loop on the current runtime.
pub fn start_sweeper(manager: Arc<TxnManager>, interval: Duration) -> SweeperHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh boot does not
        // sweep before anyone had a chance to run.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => manager.sweep_stale(),
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!("transaction sweeper stopped");
    });
    SweeperHandle { shutdown, task }
}
