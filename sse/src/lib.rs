//! Server-Sent Events (SSE) infrastructure for real-time fan-out.
//!
//! This crate owns every long-lived stream the server holds open and delivers
//! broadcast events to all of them.
//!
//! # Architecture
//!
//! - **ConnectionRegistry**: DashMap-backed set of live streams. Each entry owns
//!   its transport and exactly one heartbeat task.
//! - **HeartbeatScheduler**: one periodic heartbeat per connection; a failed one
//!   removes the connection immediately.
//! - **Broadcaster**: snapshot-then-reconcile fan-out. Per-connection failures
//!   are counted, never raised.
//! - **ReconciliationSweep**: periodic eviction of dead or silent connections.
//! - **ShutdownCoordinator**: refuse new streams, notify, close, terminate,
//!   all within a deadline backed by a forced exit.
//! - **Ephemeral messages**: nothing is retained. A subscriber that is offline
//!   misses the event.
//!
//! # Message Flow
//!
//! 1. Client opens `GET /events`
//! 2. The handler wraps a bounded response channel in a `ChannelTransport`
//!    and registers it; the client receives `connected` with its id. A
//!    subscriber that stops draining fills its queue and is dropped
//! 3. A producer calls `Broadcaster::broadcast` (directly or through
//!    `events::EventPublisher` and `SseEventHandler`)
//! 4. The broadcaster snapshots the registry ids and sends to each one
//! 5. Connections that failed are marked dead and removed by a reconciliation
//!    pass spawned after the loop
//!
//! # Modules
//!
//! - `connection`: ConnectionId, Transport, ChannelTransport and ConnectionRegistry
//! - `broadcaster`: fan-out and delivery reports
//! - `heartbeat`: per-connection liveness heartbeats
//! - `sweep`: periodic dead-connection eviction
//! - `shutdown`: bounded graceful teardown
//! - `message`: reserved events and SSE framing

pub mod broadcaster;
pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod shutdown;
pub mod sweep;

pub use broadcaster::{BroadcastReport, Broadcaster, StreamPhase};
pub use connection::{
    ChannelTransport, ConnectionId, ConnectionRegistry, Transport, STREAM_BUFFER,
};
pub use domain_event_handler::SseEventHandler;
pub use heartbeat::HeartbeatScheduler;
pub use shutdown::{Listener, ShutdownCoordinator, ShutdownState};
pub use sweep::ReconciliationSweep;

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::Error;
    use crate::Transport;
    use async_trait::async_trait;
    use events::Event;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory transport that records frames and can be told to fail.
    #[derive(Default)]
    pub struct MockTransport {
        sent: Mutex<Vec<Event>>,
        fail: AtomicBool,
        hang_on_close: bool,
        close_calls: AtomicUsize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// A transport whose `close` never returns.
        pub fn hanging_on_close() -> Self {
            Self {
                hang_on_close: true,
                ..Self::default()
            }
        }

        pub fn fail_sends(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Event> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_types(&self) -> Vec<String> {
            self.sent()
                .iter()
                .map(|event| event.event_type().to_string())
                .collect()
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn send(&self, event: &Event) -> Result<(), Error> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::closed());
            }
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_on_close {
                std::future::pending::<()>().await;
            }
        }
    }
}
