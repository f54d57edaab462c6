use crate::Broadcaster;
use async_trait::async_trait;
use events::{Event, EventHandler};
use log::*;

/// Bridges the producer-side `EventPublisher` to the stream broadcaster.
///
/// Business logic publishes events without knowing about SSE; this handler
/// fans each one out to every live connection.
pub struct SseEventHandler {
    broadcaster: Broadcaster,
}

impl SseEventHandler {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl EventHandler for SseEventHandler {
    async fn handle(&self, event: &Event) {
        let report = self.broadcaster.broadcast(event);

        if !event.is_quiet() {
            debug!(
                "Published {} to {} connection(s), {} failed",
                event.event_type(),
                report.delivered,
                report.failed
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::HeartbeatScheduler;
    use crate::testing::MockTransport;
    use events::EventPublisher;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_published_events_reach_streams() {
        let broadcaster = Broadcaster::new(HeartbeatScheduler::new(Duration::from_secs(3600)));
        let transport = Arc::new(MockTransport::new());
        broadcaster.register_connection(transport.clone()).unwrap();

        let publisher =
            EventPublisher::new().with_handler(Arc::new(SseEventHandler::new(broadcaster)));
        publisher
            .publish(Event::new("quote_accepted", json!({"quote_id": 12})))
            .await;

        assert_eq!(transport.sent_types(), vec!["connected", "quote_accepted"]);
    }
}
