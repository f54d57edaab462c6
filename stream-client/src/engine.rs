//! The reconnection state machine.
//!
//! One driver task per [`Subscription`] walks the resolved endpoint list,
//! gives each attempt a deadline, cycles the list when every endpoint has
//! failed and falls back to a long backoff after repeated failed cycles. It
//! never gives up on its own; only [`Subscription::close`] stops it.
//!
//! A stream only counts as recovered once it has stayed open for
//! `stable_after`. One that drops sooner is an endpoint failure, so an
//! endpoint that accepts and immediately hangs up still ends in backoff.
//!
//! Every transition is published under the same lock `close()` takes and is
//! tagged with the epoch the driver started in. Once `close()` bumps the
//! epoch, a timer or transport callback that was already in flight cannot
//! publish anything.

use crate::config::ClientConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::Error;
use crate::resolver::EndpointSource;
use crate::transport::{Connector, TransportEvent, TransportStream};
use futures_util::StreamExt;
use log::*;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time;

const TRANSITION_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting {
        endpoint: String,
        index: usize,
        retry_cycle: u32,
    },
    Open {
        endpoint: String,
    },
    EndpointFailed {
        endpoint: String,
        index: usize,
        reason: String,
    },
    /// Every endpoint failed; `retry_cycle` counts consecutive failed cycles.
    CycleExhausted {
        retry_cycle: u32,
    },
    Backoff {
        retry_cycle: u32,
    },
    Stopped,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Open { .. } => "open",
            Self::EndpointFailed { .. } => "endpoint_failed",
            Self::CycleExhausted { .. } => "cycle_exhausted",
            Self::Backoff { .. } => "backoff",
            Self::Stopped => "stopped",
        }
    }
}

struct Inner {
    epoch: u64,
    state: ConnectionState,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<ConnectionState>,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Caller holds the lock so observers see transitions in order.
    fn publish(&self, inner: &mut Inner, next: ConnectionState) {
        match &next {
            ConnectionState::EndpointFailed {
                endpoint, reason, ..
            } => debug!("{} -> endpoint_failed ({endpoint}: {reason})", inner.state.name()),
            ConnectionState::Connecting {
                endpoint,
                retry_cycle,
                ..
            } => debug!(
                "{} -> connecting ({endpoint}, cycle {retry_cycle})",
                inner.state.name()
            ),
            _ => debug!("{} -> {}", inner.state.name(), next.name()),
        }

        inner.state = next.clone();
        self.state_tx.send_replace(next.clone());
        // No subscribers is fine
        let _ = self.transitions_tx.send(next);
    }
}

/// Handle to one reconnecting subscription.
///
/// Dropping the handle does not stop the subscription; call [`close`](Self::close).
pub struct Subscription {
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl Subscription {
    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch the current state.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Every transition from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.transitions_tx.subscribe()
    }

    /// Stop the subscription from any state. Idempotent.
    ///
    /// The pending timer and the open transport are dropped by the driver;
    /// no transition other than `Stopped` is published after this returns.
    pub fn close(&self) {
        let mut inner = self.shared.lock();
        if inner.state == ConnectionState::Stopped {
            return;
        }
        inner.epoch += 1;
        self.shared.publish(&mut inner, ConnectionState::Stopped);
        drop(inner);

        self.shared.closed_tx.send_replace(true);
        info!("Subscription closed");
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed_tx.borrow()
    }

    /// Wait for the driver task to exit. Only returns after `close()`.
    pub async fn join(self) {
        if let Err(e) = self.driver.await {
            error!("Subscription driver failed: {e}");
        }
    }
}

/// Start a subscription over `connector`. Must be called inside a tokio runtime.
pub fn connect_with<S, C>(
    source: S,
    connector: C,
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
) -> Subscription
where
    S: EndpointSource + 'static,
    C: Connector,
{
    let (state_tx, _) = watch::channel(ConnectionState::Idle);
    let (transitions_tx, _) = broadcast::channel(TRANSITION_BUFFER);
    let (closed_tx, _) = watch::channel(false);

    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            epoch: 0,
            state: ConnectionState::Idle,
        }),
        state_tx,
        transitions_tx,
        closed_tx,
    });

    let driver = Driver {
        shared: Arc::clone(&shared),
        epoch: 0,
        source: Box::new(source),
        connector: Box::new(connector),
        config,
        dispatcher,
    };

    let driver = tokio::spawn(driver.run_until_closed());
    Subscription { shared, driver }
}

struct Driver {
    shared: Arc<Shared>,
    epoch: u64,
    source: Box<dyn EndpointSource>,
    connector: Box<dyn Connector>,
    config: ClientConfig,
    dispatcher: Arc<EventDispatcher>,
}

impl Driver {
    async fn run_until_closed(self) {
        let mut closed = self.shared.closed_tx.subscribe();

        // Dropping `run` drops its pending timer and transport with it
        tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => {}
            _ = self.run() => {}
        }
        debug!("Subscription driver exited");
    }

    /// Returns only when a transition is refused because of `close()`.
    async fn run(&self) {
        let mut retry_cycle = 0;

        loop {
            let endpoints = self.source.endpoints();
            let mut recovered = false;

            for (index, endpoint) in endpoints.iter().enumerate() {
                if !self.transition(ConnectionState::Connecting {
                    endpoint: endpoint.clone(),
                    index,
                    retry_cycle,
                }) {
                    return;
                }

                let failure = match self.attempt(endpoint).await {
                    Ok((stream, early_frame)) => {
                        if !self.transition(ConnectionState::Open {
                            endpoint: endpoint.clone(),
                        }) {
                            return;
                        }
                        info!("Connected to {endpoint}");
                        let opened_at = time::Instant::now();

                        if let Some(frame) = early_frame {
                            self.dispatcher.dispatch(&frame);
                        }
                        let lost = self.pump(stream).await;
                        let held = opened_at.elapsed();

                        if held >= self.config.stable_after {
                            warn!("Lost connection to {endpoint} after {held:?}: {lost}");
                            recovered = true;
                            break;
                        }
                        // Dropped right after opening: counts against the cycle
                        warn!("Connection to {endpoint} dropped after {held:?}: {lost}");
                        lost
                    }
                    Err(e) => e,
                };

                if !self.transition(ConnectionState::EndpointFailed {
                    endpoint: endpoint.clone(),
                    index,
                    reason: failure.to_string(),
                }) {
                    return;
                }
                if index + 1 < endpoints.len() {
                    time::sleep(self.config.endpoint_switch_delay).await;
                }
            }

            // A stream that stayed up restarts from the top of a fresh list
            if recovered {
                retry_cycle = 0;
                time::sleep(self.config.endpoint_switch_delay).await;
                continue;
            }

            retry_cycle += 1;
            if !self.transition(ConnectionState::CycleExhausted { retry_cycle }) {
                return;
            }

            if retry_cycle < self.config.max_retry_cycles {
                time::sleep(self.config.per_cycle_delay).await;
                continue;
            }

            warn!(
                "All endpoints failed {retry_cycle} cycle(s) in a row, backing off for {:?}",
                self.config.backoff_delay
            );
            if !self.transition(ConnectionState::Backoff { retry_cycle }) {
                return;
            }
            time::sleep(self.config.backoff_delay).await;
            if !self.transition(ConnectionState::Idle) {
                return;
            }
            retry_cycle = 0;
        }
    }

    /// Open `endpoint` and wait for establishment within the attempt deadline.
    /// A frame that arrives together with establishment is handed back.
    async fn attempt(&self, endpoint: &str) -> Result<(TransportStream, Option<String>), Error> {
        let deadline = self.config.attempt_timeout(endpoint);
        let mut stream = self.connector.open(endpoint);

        let established = time::timeout(deadline, async {
            match stream.next().await {
                Some(TransportEvent::Opened) | Some(TransportEvent::KeepAlive) => Ok(None),
                Some(TransportEvent::Frame(frame)) => Ok(Some(frame)),
                Some(TransportEvent::Failed(reason)) => Err(Error::transport(reason)),
                None => Err(Error::transport("stream ended before opening")),
            }
        })
        .await
        .map_err(|_| Error::timeout(deadline))?;

        established.map(|early_frame| (stream, early_frame))
    }

    /// Feed frames to the dispatcher until the stream fails, ends or goes silent.
    async fn pump(&self, mut stream: TransportStream) -> Error {
        loop {
            let next = match self.config.liveness_timeout {
                Some(limit) => match time::timeout(limit, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return Error::timeout(limit),
                },
                None => stream.next().await,
            };

            match next {
                Some(TransportEvent::Frame(frame)) => {
                    self.dispatcher.dispatch(&frame);
                }
                Some(TransportEvent::Opened) | Some(TransportEvent::KeepAlive) => {}
                Some(TransportEvent::Failed(reason)) => return Error::transport(reason),
                None => return Error::transport("stream closed by server"),
            }
        }
    }

    /// Publish `next` unless `close()` has moved the epoch on.
    fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.shared.lock();
        if inner.epoch != self.epoch {
            return false;
        }
        self.shared.publish(&mut inner, next);
        true
    }
}
