use crate::connection::{ConnectionId, ConnectionRegistry};
use log::*;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Starts one periodic liveness check per connection.
///
/// Each tick sends a `heartbeat` event to its connection only. A failed
/// send deregisters the connection right away instead of waiting for the
/// next tick or the reconciliation sweep.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatScheduler {
    interval: Duration,
}

impl HeartbeatScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the heartbeat task for `connection_id`. The task holds only a weak
    /// reference so a dropped registry ends every timer with it.
    pub(crate) fn start(
        &self,
        registry: Weak<ConnectionRegistry>,
        connection_id: ConnectionId,
    ) -> JoinHandle<()> {
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let Some(registry) = registry.upgrade() else {
                    return;
                };

                if let Err(e) = registry.send_heartbeat(&connection_id) {
                    if !registry.contains(&connection_id) {
                        return;
                    }
                    warn!("Heartbeat to connection {connection_id} failed: {e}. Removing it.");
                    // Removal aborts this task, so run it on its own task
                    tokio::spawn(async move {
                        registry.deregister(&connection_id).await;
                    });
                    return;
                }

                trace!("Heartbeat sent to connection {connection_id}");
            }
        })
    }
}

impl Default for HeartbeatScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}
