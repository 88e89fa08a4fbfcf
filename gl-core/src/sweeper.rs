use crate::store::OperationStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns the background expiry sweep.
///
/// Each tick demotes overdue `pending` records to `expired` and evicts
/// terminal records past the retention window. The sweep itself goes through
/// the store's guarded transitions, so a reviewer action racing a tick is
/// resolved per record, one winner each.
pub fn spawn_sweeper_loop(
    store: Arc<OperationStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; sweeping an empty store is fine.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("expiry sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let expired = store.sweep_expired(now);
                    let evicted = store.evict_resolved(now);
                    if expired > 0 || evicted > 0 {
                        tracing::info!(expired, evicted, "sweep pass completed");
                    }
                }
            }
        }
    })
}
