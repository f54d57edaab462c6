use config::Config;
use events::EventPublisher;
use log::info;
use sse::{Broadcaster, HeartbeatScheduler, ReconciliationSweep, SseEventHandler};
use std::sync::Arc;

pub mod config;
pub mod logging;

// Service-level state containing only infrastructure concerns
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub broadcaster: Broadcaster,
    pub event_publisher: Arc<EventPublisher>,
}

impl AppState {
    /// Build the stream core from configuration: registry with heartbeats,
    /// broadcaster, and a publisher that forwards to it.
    pub fn new(app_config: Config) -> Self {
        info!(
            "Stream config: heartbeat={}s, sweep={}s, inactivity_threshold={}s, shutdown_deadline={}s",
            app_config.heartbeat_interval_secs,
            app_config.sweep_interval_secs,
            app_config.inactivity_threshold_secs,
            app_config.shutdown_deadline_secs,
        );

        let broadcaster = Broadcaster::new(HeartbeatScheduler::new(app_config.heartbeat_interval()));
        let event_publisher = EventPublisher::new()
            .with_handler(Arc::new(SseEventHandler::new(broadcaster.clone())));

        Self {
            config: app_config,
            broadcaster,
            event_publisher: Arc::new(event_publisher),
        }
    }

    pub fn reconciliation_sweep(&self) -> ReconciliationSweep {
        ReconciliationSweep::new(
            self.config.sweep_interval(),
            self.config.inactivity_threshold(),
        )
    }
}
