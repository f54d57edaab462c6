use crate::connection::ConnectionRegistry;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(10 * 60);

/// Periodic eviction of connections that are flagged dead or have gone silent.
///
/// Catches anything heartbeat failures and client disconnects did not already
/// remove, e.g. a failure that was recorded but whose removal never ran.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationSweep {
    interval: Duration,
    inactivity_threshold: Duration,
}

impl ReconciliationSweep {
    pub fn new(interval: Duration, inactivity_threshold: Duration) -> Self {
        Self {
            interval,
            inactivity_threshold,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn inactivity_threshold(&self) -> Duration {
        self.inactivity_threshold
    }

    /// Run one pass. Returns the number of evicted connections.
    pub async fn run_once(&self, registry: &ConnectionRegistry) -> usize {
        let evicted = registry.evict_stale(self.inactivity_threshold).await;
        if evicted > 0 {
            info!(
                "Reconciliation sweep evicted {evicted} connection(s), {} remain",
                registry.count()
            );
        } else {
            trace!("Reconciliation sweep found nothing to evict");
        }
        evicted
    }

    pub fn spawn(self, registry: Arc<ConnectionRegistry>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                self.run_once(&registry).await;
            }
        })
    }
}

impl Default for ReconciliationSweep {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL, DEFAULT_INACTIVITY_THRESHOLD)
    }
}
