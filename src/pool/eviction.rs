use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ClientPool;

pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Sweep expired clients every `interval` until `shutdown` is cancelled.
///
/// Acquires already sweep on their own; this keeps an idle pool from holding
/// stale clients indefinitely.
pub async fn run_eviction_loop(
    pool: Arc<ClientPool>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    info!(
        "Pool eviction task starting (interval={}s)",
        interval.as_secs()
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = pool.evict_expired();
                if evicted > 0 {
                    debug!("Periodic sweep evicted {} clients", evicted);
                }
            }
            _ = shutdown.cancelled() => {
                info!("Pool eviction task shutting down");
                break;
            }
        }
    }
}
