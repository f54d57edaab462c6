//! Event system infrastructure for the stream relay.
//!
//! This crate provides the event value that flows through the relay and the
//! publisher that lets business logic hand events to the infrastructure
//! (like the SSE broadcaster) without depending on it.
//!
//! # Architecture
//!
//! - **Event**: an opaque type tag plus a JSON payload and a creation timestamp
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, so any producer can emit
//! events. Payloads are carried as serialized JSON values.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Reserved event types emitted by the relay itself.
pub mod reserved {
    /// First event on every stream, carries the assigned connection id.
    pub const CONNECTED: &str = "connected";
    /// Periodic liveness signal sent to each connection.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Sent to every connection right before the server tears streams down.
    pub const SERVER_SHUTDOWN: &str = "server_shutdown";
    /// Low-priority status updates.
    pub const SYSTEM_STATUS: &str = "system_status";

    /// High-frequency types that are exempt from verbose per-event logging.
    pub const QUIET: &[&str] = &[HEARTBEAT, SYSTEM_STATUS];

    pub fn is_quiet(event_type: &str) -> bool {
        QUIET.contains(&event_type)
    }
}

/// A single broadcastable event.
///
/// Events are immutable once constructed. Each connection that receives an
/// event serializes it independently, so the same value may be fanned out to
/// any number of subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
    // Frames from older producers may omit it; stamp on receipt
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// True for reserved high-frequency types (heartbeats, status pings).
    pub fn is_quiet(&self) -> bool {
        reserved::is_quiet(&self.event_type)
    }

    /// Serialize into the JSON wire frame: `{"type", "data", "timestamp"}`.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Trait for handling published events.
/// Implementations can perform side effects like fanning out to streams,
/// updating caches, logging, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

/// Publishes events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Publish an event to all registered handlers.
    /// Handlers are called sequentially and are expected to absorb their own
    /// failures; a handler never stops the remaining ones from running.
    pub async fn publish(&self, event: Event) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) {
            self.seen.lock().unwrap().push(event.event_type().to_string());
        }
    }

    #[test]
    fn test_event_frame_uses_type_and_data_keys() {
        let event = Event::new("price_updated", json!({"sku": "A-1", "cents": 250}));
        let frame: Value = serde_json::from_str(&event.to_frame().unwrap()).unwrap();

        assert_eq!(frame["type"], "price_updated");
        assert_eq!(frame["data"]["cents"], 250);
        assert!(frame["timestamp"].is_string());
    }

    #[test]
    fn test_reserved_quiet_types() {
        assert!(Event::new(reserved::HEARTBEAT, Value::Null).is_quiet());
        assert!(Event::new(reserved::SYSTEM_STATUS, Value::Null).is_quiet());
        assert!(!Event::new(reserved::CONNECTED, Value::Null).is_quiet());
        // Matching is exact and case-sensitive
        assert!(!reserved::is_quiet("Heartbeat"));
    }

    #[test]
    fn test_event_deserializes_without_data() {
        let event: Event =
            serde_json::from_str(r#"{"type":"ping","timestamp":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(event.event_type(), "ping");
        assert_eq!(event.data(), &Value::Null);
        assert_eq!(event.timestamp().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_event_deserializes_with_only_type_and_unknown_fields() {
        let event: Event = serde_json::from_str(r#"{"type":"ping","extra":true}"#).unwrap();
        assert_eq!(event.event_type(), "ping");
    }

    #[test]
    fn test_event_without_type_is_rejected() {
        assert!(serde_json::from_str::<Event>(r#"{"data":{}}"#).is_err());
    }

    #[tokio::test]
    async fn test_publisher_calls_handlers_in_registration_order() {
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });

        let publisher = EventPublisher::new()
            .with_handler(first.clone())
            .with_handler(second.clone());
        assert_eq!(publisher.handler_count(), 2);

        publisher
            .publish(Event::new("file_uploaded", json!({"name": "a.png"})))
            .await;

        assert_eq!(*first.seen.lock().unwrap(), vec!["file_uploaded"]);
        assert_eq!(*second.seen.lock().unwrap(), vec!["file_uploaded"]);
    }
}
