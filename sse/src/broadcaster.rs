use crate::connection::{ConnectionId, ConnectionRegistry, Transport};
use crate::error::Error;
use crate::heartbeat::HeartbeatScheduler;
use crate::message;
use events::Event;
use log::*;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Outcome of one fan-out. `delivered + failed` always equals the size of the
/// snapshot taken when the broadcast started.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Whether new streams are admitted and whether open ones may keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Accepting,
    /// Shutdown started: no new streams, open ones still get the notice.
    Refusing,
    /// Every stream body must end now, registered or not.
    Terminated,
}

/// Fans events out to every registered connection.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    phase: Arc<watch::Sender<StreamPhase>>,
}

impl Broadcaster {
    pub fn new(heartbeat: HeartbeatScheduler) -> Self {
        Self::with_registry(ConnectionRegistry::new(heartbeat))
    }

    pub fn with_registry(registry: Arc<ConnectionRegistry>) -> Self {
        let (phase, _) = watch::channel(StreamPhase::Accepting);
        Self {
            registry,
            phase: Arc::new(phase),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn phase(&self) -> StreamPhase {
        *self.phase.borrow()
    }

    /// Refuse new streams from now on.
    pub fn stop_accepting(&self) {
        self.advance(StreamPhase::Refusing);
    }

    /// Tell every stream body still running to end.
    pub fn terminate_streams(&self) {
        self.advance(StreamPhase::Terminated);
    }

    fn advance(&self, next: StreamPhase) {
        self.phase.send_if_modified(|phase| {
            // Phases only move forward
            if (*phase as u8) < (next as u8) {
                *phase = next;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once [`terminate_streams`](Self::terminate_streams) has been called.
    pub fn streams_terminated(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut phase = self.phase.subscribe();
        async move {
            loop {
                if *phase.borrow_and_update() == StreamPhase::Terminated {
                    return;
                }
                if phase.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Register a new stream, greet it with its id and return the id.
    /// Fails once shutdown has started.
    pub fn register_connection(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<ConnectionId, Error> {
        if self.phase() != StreamPhase::Accepting {
            debug!("Refusing new SSE connection, shutdown in progress");
            return Err(Error::shutting_down());
        }

        let connection_id = self.registry.register(transport);
        let greeting = message::connected(&connection_id, self.registry.count());

        if let Err(e) = self.registry.send_to(&connection_id, &greeting) {
            warn!("Failed to greet connection {connection_id}: {e}");
            self.registry.mark_dead(&connection_id);
        }

        info!("Registered new SSE connection {connection_id}");
        Ok(connection_id)
    }

    pub async fn unregister_connection(&self, connection_id: &ConnectionId) {
        if self.registry.deregister(connection_id).await {
            info!("Unregistered SSE connection {connection_id}");
        }
    }

    /// Send `event` to every connection present when the call starts.
    ///
    /// A failing connection is marked dead and counted, never raised; the
    /// remaining connections still get the event. Dead connections are removed
    /// by a reconciliation pass scheduled after the loop.
    pub fn broadcast(&self, event: &Event) -> BroadcastReport {
        let snapshot = self.registry.ids();
        let mut report = BroadcastReport::default();

        for connection_id in &snapshot {
            match self.registry.send_to(connection_id, event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "Failed to send {} to connection {connection_id}: {e}. Connection will be cleaned up.",
                        event.event_type()
                    );
                    self.registry.mark_dead(connection_id);
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            self.schedule_reconcile();
        }

        if event.is_quiet() {
            trace!("Broadcast {} {report:?}", event.event_type());
        } else {
            debug!("Broadcast {} {report:?}", event.event_type());
        }
        report
    }

    fn schedule_reconcile(&self) {
        // Outside a runtime the periodic sweep picks dead entries up instead
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        runtime.spawn(async move {
            let removed = registry.reconcile().await;
            if removed > 0 {
                debug!("Reconciled {removed} dead connection(s) after broadcast");
            }
        });
    }
}
