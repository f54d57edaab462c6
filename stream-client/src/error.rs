//! Error types for the `stream-client` crate.
//!
//! Follows the same pattern as the server crates with a root Error struct and
//! error kind enums. None of these are fatal to a subscription: transport and
//! timeout errors feed the reconnection engine, parse and handler errors are
//! isolated by the dispatcher.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// The stream could not be established or dropped after opening.
    Transport(String),
    /// An attempt exceeded its deadline. Treated like a transport error.
    Timeout(Duration),
    /// An inbound frame was not a valid event.
    Parse,
    /// A registered handler returned an error or panicked.
    Handler(String),
    /// Invalid client configuration, e.g. an endpoint that is not a URL.
    Config(String),
}

impl Error {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Transport(reason.into()),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Timeout(after),
        }
    }

    pub fn handler(event_type: impl Into<String>, source: Box<dyn StdError + Send + Sync>) -> Self {
        Self {
            source: Some(source),
            error_kind: ErrorKind::Handler(event_type.into()),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Config(reason.into()),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(reason) => write!(f, "transport error: {reason}")?,
            ErrorKind::Timeout(after) => write!(f, "connection attempt timed out after {after:?}")?,
            ErrorKind::Parse => write!(f, "malformed event frame")?,
            ErrorKind::Handler(event_type) => write!(f, "handler for {event_type} failed")?,
            ErrorKind::Config(reason) => write!(f, "invalid configuration: {reason}")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Parse,
        }
    }
}
