//! Background maintenance
//!
//! Author: hephaex@gmail.com

use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Periodically purge expired blacklist entries and refresh tokens, and drop
/// rate-limit buckets that have refilled.
pub fn spawn_purge_task(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match state.auth.purge_expired().await {
                Ok(report) => info!(
                    blacklist_entries = report.blacklist_entries,
                    refresh_tokens = report.refresh_tokens,
                    "Expired credentials purged"
                ),
                Err(e) => error!(error = %e, "Purge of expired credentials failed"),
            }

            let evicted = state.rate_limiter.evict_idle();
            if evicted > 0 {
                info!(evicted, "Evicted idle rate-limit buckets");
            }
        }
    })
}
