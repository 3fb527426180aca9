use crate::reconcile::Reconciler;
use crate::sync::{SyncEngine, SyncError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy)]
pub struct Schedules {
    pub sync_interval: Duration,
    pub reconcile_interval: Duration,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(10),
            reconcile_interval: Duration::from_secs(600),
        }
    }
}

/// Spawns the two periodic triggers. Both loops log and swallow every error:
/// a failed pass is retried from the last committed cursor on the next tick,
/// and nothing may take the scheduling substrate down with it.
pub fn spawn(engine: Arc<SyncEngine>, reconciler: Arc<Reconciler>, schedules: Schedules) {
    tokio::spawn(async move {
        let mut ticker = interval(schedules.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match engine.run_pass().await {
                Ok(summary) if summary.chunks > 0 => {
                    info!(
                        "Scheduled sync processed blocks {} to {}",
                        summary.from_block, summary.to_block
                    );
                }
                Ok(_) => {}
                Err(SyncError::Conflict) => {
                    debug!("Sync already in progress, skipping this tick");
                }
                Err(SyncError::Failed(error)) => {
                    error!("Scheduled sync failed: {error:#}");
                }
            }
        }
    });

    tokio::spawn(async move {
        // No immediate first tick: a fresh process has nothing to audit yet.
        let start = Instant::now() + schedules.reconcile_interval;
        let mut ticker = interval_at(start, schedules.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconciler.run().await {
                Ok(summary) if summary.replaced => {
                    info!(
                        "Reconciliation corrected drift across {} holders",
                        summary.audited
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    error!("Reconciliation failed: {error:#}");
                }
            }
        }
    });
}
