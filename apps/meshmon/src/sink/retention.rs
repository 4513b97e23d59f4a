use super::backend::Backend;
use crate::shutdown::shutdown_requested;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Periodically deletes node rows older than `delete_after`. Independent of the batch consumer
/// apart from the shared shutdown signal.
pub fn spawn_retention(
    backend: Arc<dyn Backend>,
    every: Duration,
    delete_after: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = ticker.tick() => {
                    match backend.delete_node(delete_after).await {
                        Ok(()) => tracing::info!(
                            backend = backend.name(),
                            older_than_secs = delete_after.as_secs(),
                            "deleted aged node points"
                        ),
                        Err(err) => tracing::warn!(error = %err, "retention delete failed"),
                    }
                }
            }
        }
        tracing::debug!("retention task stopped");
    })
}
