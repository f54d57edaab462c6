//! HTTP surface of the stream relay: the streaming endpoint, the producer
//! endpoint and the server lifecycle (serve, then bounded shutdown).

use async_trait::async_trait;
use axum::Router;
use log::*;
use sse::{Listener, ShutdownCoordinator};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub use error::{Error, Result};
pub use service::AppState;

mod controller;
mod error;
pub mod router;
mod stream;

/// How long hyper may take to finish in-flight requests before the server
/// task is aborted.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Handle to the spawned axum server, driven by the shutdown coordinator.
pub struct ServerHandle {
    graceful: Mutex<Option<oneshot::Sender<()>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl ServerHandle {
    pub fn spawn(listener: TcpListener, router: Router) -> Self {
        let (graceful_tx, graceful_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = graceful_rx.await;
                })
                .await
        });

        Self {
            graceful: Mutex::new(Some(graceful_tx)),
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }
}

#[async_trait]
impl Listener for ServerHandle {
    /// Signal hyper to shut every client connection down; stream bodies have
    /// already ended by the time this runs.
    async fn terminate_connections(&self) {
        let sender = self
            .graceful
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Wait for hyper to drain, then abort whatever is still being served.
    async fn close(&self) {
        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };
        let joined = match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Server still draining after {DRAIN_GRACE:?}, aborting it");
                task.abort();
                task.await
            }
        };
        match joined {
            Ok(Ok(())) => debug!("Server task finished"),
            Ok(Err(e)) => error!("Server exited with error: {e}"),
            Err(e) if e.is_cancelled() => debug!("Server task aborted"),
            Err(e) => error!("Server task failed to join: {e}"),
        }
    }
}

pub async fn init_server(app_state: AppState) -> Result<()> {
    let bind_address = app_state.config.bind_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Server starting... listening for connections on http://{bind_address}");

    let router = router::define_routes(app_state.clone());
    let server = ServerHandle::spawn(listener, router);

    let broadcaster = app_state.broadcaster.clone();
    let sweep = app_state
        .reconciliation_sweep()
        .spawn(broadcaster.registry().clone());

    let coordinator = ShutdownCoordinator::new(
        broadcaster,
        Box::new(server),
        app_state.config.shutdown_deadline(),
    );
    coordinator.track(sweep);

    shutdown_signal().await;
    coordinator.shutdown("server stopping").await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
