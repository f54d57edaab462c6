//! Error types for the `sse` crate.
//!
//! Follows the platform pattern of a root Error struct holding an error kind
//! tree plus an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in the stream core.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// A write to a single subscriber failed. Isolated per connection.
    Transport(TransportErrorKind),
    /// New streams are refused once shutdown has started.
    ShuttingDown,
    /// Graceful shutdown did not finish in time; the process is forced to exit.
    ShutdownDeadlineExceeded(Duration),
}

#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    /// The subscriber went away or the transport was already closed.
    Closed,
    /// The subscriber's queue is full; its socket stopped draining.
    Stalled,
    /// The connection id is no longer present in the registry.
    NotRegistered,
    /// The event could not be turned into a stream frame.
    Serialization,
}

impl Error {
    pub fn closed() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Transport(TransportErrorKind::Closed),
        }
    }

    pub fn stalled() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Transport(TransportErrorKind::Stalled),
        }
    }

    pub fn shutting_down() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::ShuttingDown,
        }
    }

    pub fn not_registered() -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::Transport(TransportErrorKind::NotRegistered),
        }
    }

    pub fn serialization(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: Some(source.into()),
            error_kind: ErrorKind::Transport(TransportErrorKind::Serialization),
        }
    }

    pub fn deadline_exceeded(deadline: Duration) -> Self {
        Self {
            source: None,
            error_kind: ErrorKind::ShutdownDeadlineExceeded(deadline),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Transport(kind) => write!(f, "SSE transport error: {kind:?}")?,
            ErrorKind::ShuttingDown => write!(f, "Server is shutting down")?,
            ErrorKind::ShutdownDeadlineExceeded(deadline) => {
                write!(f, "Shutdown did not complete within {deadline:?}")?
            }
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
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
        Error::serialization(err)
    }
}
