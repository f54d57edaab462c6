use crate::broadcaster::{BroadcastReport, Broadcaster};
use crate::error::Error;
use crate::message;
use async_trait::async_trait;
use futures::future::join_all;
use log::*;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// The accepting side of the server, as seen by the shutdown sequence.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Tear down sockets still open beneath the stream transports.
    async fn terminate_connections(&self);

    /// Stop accepting and release the listening socket.
    async fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Closed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Result of the `server_shutdown` notice.
    pub notified: BroadcastReport,
    pub connections_closed: usize,
    /// Set when shutdown had already been requested and this call did nothing.
    pub already_requested: bool,
}

type ForceExit = Box<dyn Fn() + Send + Sync>;

/// Graceful, then forced, teardown of every stream and the listener.
///
/// The sequence is bounded by a deadline. If any step hangs past it the
/// force-exit hook runs (process exit by default) instead of waiting.
pub struct ShutdownCoordinator {
    broadcaster: Broadcaster,
    listener: Box<dyn Listener>,
    deadline: Duration,
    state: Mutex<ShutdownState>,
    background: Mutex<Vec<JoinHandle<()>>>,
    force_exit: ForceExit,
}

impl ShutdownCoordinator {
    pub fn new(broadcaster: Broadcaster, listener: Box<dyn Listener>, deadline: Duration) -> Self {
        Self {
            broadcaster,
            listener,
            deadline,
            state: Mutex::new(ShutdownState::Running),
            background: Mutex::new(Vec::new()),
            force_exit: Box::new(|| std::process::exit(1)),
        }
    }

    /// Replace the action taken when the deadline expires.
    pub fn with_force_exit(mut self, force_exit: impl Fn() + Send + Sync + 'static) -> Self {
        self.force_exit = Box::new(force_exit);
        self
    }

    /// Background task (e.g. the reconciliation sweep) to stop when draining starts.
    pub fn track(&self, task: JoinHandle<()>) {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ShutdownState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Move Running -> Draining. Returns false if shutdown was already requested.
    fn begin_draining(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ShutdownState::Running {
            return false;
        }
        *state = ShutdownState::Draining;
        drop(state);

        self.broadcaster.stop_accepting();
        true
    }

    pub async fn shutdown(&self, reason: &str) -> Result<ShutdownReport, Error> {
        if !self.begin_draining() {
            debug!("Shutdown already requested, state is {:?}", self.state());
            return Ok(ShutdownReport {
                already_requested: true,
                ..Default::default()
            });
        }

        info!(
            "Shutting down ({reason}), draining {} connection(s) within {:?}",
            self.broadcaster.registry().count(),
            self.deadline
        );

        let background = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in background {
            task.abort();
        }

        match tokio::time::timeout(self.deadline, self.drain(reason)).await {
            Ok(report) => {
                self.set_state(ShutdownState::Closed);
                info!("Shutdown complete");
                Ok(report)
            }
            Err(_) => {
                self.set_state(ShutdownState::Closed);
                error!(
                    "Shutdown exceeded its {:?} deadline, forcing exit",
                    self.deadline
                );
                (self.force_exit)();
                Err(Error::deadline_exceeded(self.deadline))
            }
        }
    }

    async fn drain(&self, reason: &str) -> ShutdownReport {
        // Best effort, a failed notice is not a reason to stop
        let notified = self.broadcaster.broadcast(&message::server_shutdown(reason));
        info!(
            "Shutdown notice sent to {} connection(s), {} failed",
            notified.delivered, notified.failed
        );

        let registry = self.broadcaster.registry();
        let ids = registry.ids();
        let closed = join_all(ids.iter().map(|id| registry.deregister(id)))
            .await
            .into_iter()
            .filter(|removed| *removed)
            .count();
        info!("Closed {closed} stream connection(s)");

        // Ends any stream body still running, registered or not
        self.broadcaster.terminate_streams();
        self.listener.terminate_connections().await;
        info!("Terminated remaining client sockets");

        self.listener.close().await;
        info!("Listener closed");

        ShutdownReport {
            notified,
            connections_closed: closed,
            already_requested: false,
        }
    }
}
