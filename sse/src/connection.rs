use crate::error::Error;
use crate::heartbeat::HeartbeatScheduler;
use crate::message;
use async_trait::async_trait;
use axum::response::sse::Event as SseEvent;
use dashmap::DashMap;
use events::Event;
use log::*;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Sending half of the channel that feeds one SSE response body.
pub type SseSender = Sender<Result<SseEvent, Infallible>>;

/// Frames a subscriber may have queued before it counts as stalled.
pub const STREAM_BUFFER: usize = 64;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-only handle to a single subscriber.
///
/// `send` must never block: it either hands the frame off or fails.
/// `close` must be idempotent; closing an already closed transport is a no-op.
#[async_trait]
pub trait Transport: Send + Sync {
    fn send(&self, event: &Event) -> Result<(), Error>;

    async fn close(&self);
}

/// Transport backed by the bounded channel an SSE handler drains.
/// A full queue means the socket stopped draining and fails the write like a
/// closed one. Closing drops the sender, which ends the response stream.
pub struct ChannelTransport {
    sender: Mutex<Option<SseSender>>,
}

impl ChannelTransport {
    pub fn new(sender: SseSender) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn send(&self, event: &Event) -> Result<(), Error> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or_else(Error::closed)?;
        // Serialized per call, every subscriber gets its own frame
        let frame = message::to_sse_event(event)?;
        sender.try_send(Ok(frame)).map_err(|e| match e {
            TrySendError::Full(_) => Error::stalled(),
            TrySendError::Closed(_) => Error::closed(),
        })
    }

    async fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// One registered stream. Owned exclusively by the registry.
struct Connection {
    transport: Arc<dyn Transport>,
    connected_at: Instant,
    last_liveness_at: Instant,
    alive: bool,
    heartbeat: Option<JoinHandle<()>>,
}

impl Connection {
    fn is_stale(&self, now: Instant, inactivity_threshold: Duration) -> bool {
        !self.alive || now.saturating_duration_since(self.last_liveness_at) > inactivity_threshold
    }
}

/// Concurrent set of live stream connections.
///
/// Every entry owns exactly one heartbeat task; removal cancels it before the
/// entry is dropped. Iteration always happens over a snapshot of ids so that
/// removals racing with a fan-out never invalidate it.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    heartbeat: HeartbeatScheduler,
}

impl ConnectionRegistry {
    pub fn new(heartbeat: HeartbeatScheduler) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            heartbeat,
        })
    }

    /// Register a new connection and start its heartbeat.
    pub fn register(self: &Arc<Self>, transport: Arc<dyn Transport>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let heartbeat = self
            .heartbeat
            .start(Arc::downgrade(self), connection_id.clone());
        let now = Instant::now();

        self.connections.insert(
            connection_id.clone(),
            Connection {
                transport,
                connected_at: now,
                last_liveness_at: now,
                alive: true,
                heartbeat: Some(heartbeat),
            },
        );

        debug!(
            "Registered connection {connection_id} ({} active)",
            self.connections.len()
        );
        connection_id
    }

    /// Cancel the heartbeat, close the transport and drop the entry.
    /// Returns false when the id was not (or no longer) registered.
    pub async fn deregister(&self, connection_id: &ConnectionId) -> bool {
        // Remove first so the shard guard is released before awaiting close
        let Some((_, mut connection)) = self.connections.remove(connection_id) else {
            return false;
        };

        if let Some(heartbeat) = connection.heartbeat.take() {
            heartbeat.abort();
        }
        connection.transport.close().await;

        debug!(
            "Deregistered connection {connection_id} after {:?} ({} active)",
            connection.connected_at.elapsed(),
            self.connections.len()
        );
        true
    }

    /// Deliver an event to one connection.
    pub fn send_to(&self, connection_id: &ConnectionId, event: &Event) -> Result<(), Error> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or_else(Error::not_registered)?;
        connection.transport.send(event)
    }

    /// Send a heartbeat and refresh liveness. Marks the connection dead on failure.
    pub(crate) fn send_heartbeat(&self, connection_id: &ConnectionId) -> Result<(), Error> {
        let mut connection = self
            .connections
            .get_mut(connection_id)
            .ok_or_else(Error::not_registered)?;

        match connection.transport.send(&message::heartbeat(connection_id)) {
            Ok(()) => {
                connection.last_liveness_at = Instant::now();
                Ok(())
            }
            Err(e) => {
                connection.alive = false;
                Err(e)
            }
        }
    }

    /// Flag a connection as dead without removing it.
    pub fn mark_dead(&self, connection_id: &ConnectionId) {
        if let Some(mut connection) = self.connections.get_mut(connection_id) {
            connection.alive = false;
        }
    }

    /// Snapshot of the current membership.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn is_alive(&self, connection_id: &ConnectionId) -> Option<bool> {
        self.connections
            .get(connection_id)
            .map(|connection| connection.alive)
    }

    pub fn last_liveness_at(&self, connection_id: &ConnectionId) -> Option<Instant> {
        self.connections
            .get(connection_id)
            .map(|connection| connection.last_liveness_at)
    }

    /// Deregister every connection already flagged dead. Returns the number removed.
    pub async fn reconcile(&self) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().alive)
            .map(|entry| entry.key().clone())
            .collect();

        self.remove_all(&dead).await
    }

    /// Deregister dead connections and those silent for longer than `inactivity_threshold`.
    pub async fn evict_stale(&self, inactivity_threshold: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().is_stale(now, inactivity_threshold))
            .map(|entry| entry.key().clone())
            .collect();

        self.remove_all(&stale).await
    }

    async fn remove_all(&self, connection_ids: &[ConnectionId]) -> usize {
        let mut removed = 0;
        for connection_id in connection_ids {
            if self.deregister(connection_id).await {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn registry() -> Arc<ConnectionRegistry> {
        ConnectionRegistry::new(HeartbeatScheduler::new(Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = registry();
        let transport = Arc::new(MockTransport::new());

        let id = registry.register(transport.clone());
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.is_alive(&id), Some(true));

        assert!(registry.deregister(&id).await);
        assert_eq!(registry.count(), 0);
        assert_eq!(transport.close_calls(), 1);

        // Second removal is a no-op, the transport is not closed again
        assert!(!registry.deregister(&id).await);
        assert_eq!(transport.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_fails() {
        let registry = registry();
        let result = registry.send_to(&ConnectionId::new(), &Event::new("x", json!({})));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reconcile_only_removes_dead_connections() {
        let registry = registry();
        let healthy = registry.register(Arc::new(MockTransport::new()));
        let dead = registry.register(Arc::new(MockTransport::new()));

        registry.mark_dead(&dead);
        assert_eq!(registry.reconcile().await, 1);

        assert!(registry.contains(&healthy));
        assert!(!registry.contains(&dead));
    }

    #[tokio::test]
    async fn test_channel_transport_close_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let transport = ChannelTransport::new(tx);

        transport.send(&Event::new("hello", json!(1))).unwrap();
        assert!(rx.recv().await.is_some());

        transport.close().await;
        transport.close().await;

        assert!(transport.send(&Event::new("hello", json!(2))).is_err());
        // Sender dropped, so the response stream ends
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_transport_fails_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let transport = ChannelTransport::new(tx);
        drop(rx);

        assert!(transport.send(&Event::new("hello", json!(1))).is_err());
    }

    #[tokio::test]
    async fn test_full_queue_fails_the_write() {
        let (tx, _rx) = mpsc::channel(1);
        let transport = ChannelTransport::new(tx);

        transport.send(&Event::new("hello", json!(1))).unwrap();
        let err = transport.send(&Event::new("hello", json!(2))).unwrap_err();
        assert_eq!(
            err.error_kind,
            crate::error::ErrorKind::Transport(crate::error::TransportErrorKind::Stalled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_that_stops_draining_is_removed() {
        let registry = registry();
        // Held but never polled, like a half-open socket
        let (tx, _rx) = mpsc::channel(2);
        let id = registry.register(Arc::new(ChannelTransport::new(tx)));

        // Two heartbeats fill the queue, the third one fails
        tokio::time::sleep(Duration::from_secs(35)).await;
        tokio::task::yield_now().await;

        assert!(!registry.contains(&id));
        assert_eq!(registry.evict_stale(Duration::from_secs(600)).await, 0);
    }
}
