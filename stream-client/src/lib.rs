//! Resilient subscriber for the stream relay.
//!
//! A subscription is built from three pieces:
//!
//! - **EndpointSource** ([`resolver`]): the ordered candidate endpoints, rebuilt
//!   at the start of every reconnection cycle
//! - **Subscription** ([`engine`]): the reconnection state machine driving one
//!   transport at a time
//! - **EventDispatcher** ([`dispatcher`]): routes each inbound event to the
//!   handlers registered for its type
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stream_client::{connect, ClientConfig, EndpointResolver, EventDispatcher};
//! use stream_client::resolver::{ResolverConfig, RunContext};
//!
//! # async fn run() {
//! let dispatcher = Arc::new(EventDispatcher::new());
//! dispatcher.subscribe("price_updated", |event: &events::Event| -> anyhow::Result<()> {
//!     println!("{}", event.data());
//!     Ok(())
//! });
//!
//! let resolver = EndpointResolver::new(RunContext::from_env(), ResolverConfig::default());
//! let subscription = connect(resolver, ClientConfig::default(), dispatcher);
//! // ...
//! subscription.close();
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod transport;

pub use config::ClientConfig;
pub use dispatcher::{DispatchOutcome, EventDispatcher, SubscriptionId, WILDCARD};
pub use engine::{connect_with, ConnectionState, Subscription};
pub use error::Error;
pub use resolver::{EndpointResolver, EndpointSource};
pub use transport::EventSourceConnector;

use std::sync::Arc;

/// Subscribe to the relay over Server-Sent Events.
///
/// Returns immediately; the first attempt starts on the runtime in the
/// background. Must be called inside a tokio runtime.
pub fn connect<S>(source: S, config: ClientConfig, dispatcher: Arc<EventDispatcher>) -> Subscription
where
    S: EndpointSource + 'static,
{
    connect_with(source, EventSourceConnector::new(), config, dispatcher)
}
