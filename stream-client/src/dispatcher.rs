//! Routing of inbound frames to application handlers.

use crate::error::Error;
use events::{reserved, Event};
use log::*;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Subscribing to this type receives every event.
pub const WILDCARD: &str = "*";

/// Application callback for one event type.
pub trait Handler: Send + Sync {
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<F> Handler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame was not a valid event and was reported as a diagnostic.
    Malformed,
    /// No handler is registered for the type; the event was dropped.
    Unhandled,
    Handled { succeeded: usize, failed: usize },
}

struct Registration {
    id: SubscriptionId,
    handler: Arc<dyn Handler>,
}

/// Owns the `type -> ordered handlers` registry for one subscription.
///
/// A malformed frame or a failing handler is reported on the diagnostics
/// channel and never stops later handlers or later frames.
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    diagnostics: Option<mpsc::UnboundedSender<Error>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            diagnostics: None,
        }
    }

    /// Dispatcher that also forwards parse and handler errors to the returned receiver.
    pub fn with_diagnostics() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            diagnostics: Some(tx),
            ..Self::new()
        };
        (dispatcher, rx)
    }

    /// Register `handler` for `event_type` (exact, case-sensitive match).
    /// Handlers for the same type run in registration order.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type.into())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;

        handlers.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|registration| registration.id != id);
            removed |= registrations.len() != before;
            !registrations.is_empty()
        });
        removed
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Parse one inbound frame and route it.
    pub fn dispatch(&self, frame: &str) -> DispatchOutcome {
        match serde_json::from_str::<Event>(frame) {
            Ok(event) => self.dispatch_event(&event),
            Err(e) => {
                warn!("Dropping malformed event frame: {e}");
                self.report(Error::from(e));
                DispatchOutcome::Malformed
            }
        }
    }

    pub fn dispatch_event(&self, event: &Event) -> DispatchOutcome {
        // Snapshot so handlers may (un)subscribe without deadlocking
        let targets = self.handlers_for(event.event_type());
        if targets.is_empty() {
            return DispatchOutcome::Unhandled;
        }

        if reserved::is_quiet(event.event_type()) {
            trace!("Dispatching {}", event.event_type());
        } else {
            debug!(
                "Dispatching {} to {} handler(s)",
                event.event_type(),
                targets.len()
            );
        }

        let mut succeeded = 0;
        let mut failed = 0;
        for handler in targets {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    warn!("Handler for {} failed: {e:#}", event.event_type());
                    self.report(Error::handler(event.event_type(), e.into()));
                    failed += 1;
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("Handler for {} panicked: {message}", event.event_type());
                    self.report(Error::handler(event.event_type(), message.into()));
                    failed += 1;
                }
            }
        }

        DispatchOutcome::Handled { succeeded, failed }
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn Handler>> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let exact = handlers.get(event_type).into_iter().flatten();
        let wildcard = handlers.get(WILDCARD).into_iter().flatten();

        exact
            .chain(wildcard)
            .map(|registration| Arc::clone(&registration.handler))
            .collect()
    }

    fn report(&self, error: Error) {
        if let Some(diagnostics) = &self.diagnostics {
            let _ = diagnostics.send(error);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Handler + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |event: &Event| -> anyhow::Result<()> {
            sink.lock().unwrap().push(event.data().to_string());
            Ok(())
        };
        (seen, handler)
    }

    #[test]
    fn test_malformed_frame_does_not_block_later_frames() {
        let (dispatcher, mut diagnostics) = EventDispatcher::with_diagnostics();
        let (seen, handler) = recorder();
        dispatcher.subscribe("order_created", handler);

        assert_eq!(dispatcher.dispatch("{not json"), DispatchOutcome::Malformed);
        assert_eq!(
            dispatcher.dispatch(r#"{"type":"order_created","data":1}"#),
            DispatchOutcome::Handled {
                succeeded: 1,
                failed: 0
            }
        );

        assert_eq!(*seen.lock().unwrap(), vec!["1"]);
        assert_eq!(diagnostics.try_recv().unwrap().error_kind, ErrorKind::Parse);
    }

    #[test]
    fn test_unknown_type_is_dropped_silently() {
        let (dispatcher, mut diagnostics) = EventDispatcher::with_diagnostics();
        assert_eq!(
            dispatcher.dispatch(r#"{"type":"nobody_listens"}"#),
            DispatchOutcome::Unhandled
        );
        assert!(diagnostics.try_recv().is_err());
    }

    #[test]
    fn test_type_matching_is_case_sensitive() {
        let dispatcher = EventDispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.subscribe("Heartbeat", handler);

        assert_eq!(
            dispatcher.dispatch(r#"{"type":"heartbeat"}"#),
            DispatchOutcome::Unhandled
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let (dispatcher, mut diagnostics) = EventDispatcher::with_diagnostics();
        dispatcher.subscribe("invoice_paid", |_: &Event| -> anyhow::Result<()> {
            anyhow::bail!("boom")
        });
        dispatcher.subscribe("invoice_paid", |_: &Event| -> anyhow::Result<()> {
            panic!("handler exploded")
        });
        let (seen, handler) = recorder();
        dispatcher.subscribe("invoice_paid", handler);

        let outcome = dispatcher.dispatch(r#"{"type":"invoice_paid","data":"x"}"#);

        assert_eq!(
            outcome,
            DispatchOutcome::Handled {
                succeeded: 1,
                failed: 2
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec![r#""x""#]);
        assert_eq!(
            diagnostics.try_recv().unwrap().error_kind,
            ErrorKind::Handler("invoice_paid".to_string())
        );
        assert_eq!(
            diagnostics.try_recv().unwrap().error_kind,
            ErrorKind::Handler("invoice_paid".to_string())
        );

        // The next event is still delivered
        dispatcher.dispatch(r#"{"type":"invoice_paid","data":"y"}"#);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let dispatcher = EventDispatcher::new();
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let first_id = dispatcher.subscribe("price_updated", first);
        dispatcher.subscribe("price_updated", second);

        assert!(dispatcher.unsubscribe(first_id));
        assert!(!dispatcher.unsubscribe(first_id));
        assert_eq!(dispatcher.handler_count("price_updated"), 1);

        dispatcher.dispatch(r#"{"type":"price_updated","data":2}"#);
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(*second_seen.lock().unwrap(), vec!["2"]);
    }

    #[test]
    fn test_wildcard_receives_every_type_after_exact_handlers() {
        let dispatcher = EventDispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let exact_order = Arc::clone(&order);
        let wildcard_order = Arc::clone(&order);
        dispatcher.subscribe(WILDCARD, move |event: &Event| -> anyhow::Result<()> {
            wildcard_order
                .lock()
                .unwrap()
                .push(format!("*:{}", event.event_type()));
            Ok(())
        });
        dispatcher.subscribe("heartbeat", move |_: &Event| -> anyhow::Result<()> {
            exact_order.lock().unwrap().push("heartbeat".to_string());
            Ok(())
        });

        dispatcher.dispatch(r#"{"type":"heartbeat"}"#);
        dispatcher.dispatch(r#"{"type":"system_status"}"#);

        assert_eq!(
            *order.lock().unwrap(),
            vec!["heartbeat", "*:heartbeat", "*:system_status"]
        );
    }
}
