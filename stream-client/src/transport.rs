//! The byte-level stream underneath a subscription.
//!
//! A [`Connector`] opens one stream per attempt and never reconnects on its
//! own; retrying is the engine's job.

use eventsource_client::{self as es, Client};
use futures_util::stream::{self, BoxStream, StreamExt};
use log::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The server accepted the request and the stream is flowing.
    Opened,
    /// One complete event frame (the SSE `data` payload).
    Frame(String),
    /// Keep-alive traffic with no event in it.
    KeepAlive,
    /// The attempt or the open stream failed. Nothing follows.
    Failed(String),
}

/// A stream of transport events for one attempt.
/// Ending without `Failed` means the server closed the stream.
pub type TransportStream = BoxStream<'static, TransportEvent>;

pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: &str) -> TransportStream;
}

/// Server-Sent Events over HTTP via `eventsource-client`.
#[derive(Debug, Clone, Default)]
pub struct EventSourceConnector {
    headers: Vec<(String, String)>,
}

impl EventSourceConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn client(&self, endpoint: &str) -> Result<impl Client, es::Error> {
        let mut builder = es::ClientBuilder::for_url(endpoint)?;
        for (name, value) in &self.headers {
            builder = builder.header(name, value)?;
        }
        Ok(builder
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build())
    }
}

impl Connector for EventSourceConnector {
    fn open(&self, endpoint: &str) -> TransportStream {
        let client = match self.client(endpoint) {
            Ok(client) => client,
            Err(e) => {
                let reason = format!("invalid endpoint {endpoint}: {e}");
                return stream::once(async move { TransportEvent::Failed(reason) }).boxed();
            }
        };
        let endpoint = endpoint.to_string();

        async_stream::stream! {
            let mut events = client.stream();
            let mut opened = false;

            while let Some(item) = events.next().await {
                match item {
                    Ok(es::SSE::Event(event)) => {
                        if !opened {
                            opened = true;
                            yield TransportEvent::Opened;
                        }
                        yield TransportEvent::Frame(event.data);
                    }
                    // Keep-alive comments still prove the stream is open
                    Ok(es::SSE::Comment(_)) => {
                        if !opened {
                            opened = true;
                            yield TransportEvent::Opened;
                        }
                        yield TransportEvent::KeepAlive;
                    }
                    #[allow(unreachable_patterns)]
                    Ok(_) => {}
                    Err(e) => {
                        warn!("SSE error for {endpoint}: {e}");
                        yield TransportEvent::Failed(e.to_string());
                        return;
                    }
                }
            }
            debug!("SSE stream ended for {endpoint}");
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_endpoint_fails_immediately() {
        let mut stream = EventSourceConnector::new().open("not a url");

        match stream.next().await {
            Some(TransportEvent::Failed(reason)) => assert!(reason.contains("not a url")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }
}
