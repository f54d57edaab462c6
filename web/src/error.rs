use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

extern crate log;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: WebErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum WebErrorKind {
    /// The request was well-formed JSON but failed validation.
    Invalid(String),
    /// The server is shutting down and takes no new streams.
    Unavailable,
    Internal,
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            source: None,
            error_kind: WebErrorKind::Invalid(reason.into()),
        }
    }
}

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.error_kind {
            WebErrorKind::Invalid(reason) => {
                log::warn!("Rejected request: {reason}");
                (StatusCode::UNPROCESSABLE_ENTITY, "UNPROCESSABLE ENTITY").into_response()
            }
            WebErrorKind::Unavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE UNAVAILABLE").into_response()
            }
            WebErrorKind::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self {
            source: Some(Box::new(err)),
            error_kind: WebErrorKind::Internal,
        }
    }
}

impl From<sse::error::Error> for Error {
    fn from(err: sse::error::Error) -> Self {
        let error_kind = match err.error_kind {
            sse::error::ErrorKind::ShuttingDown => WebErrorKind::Unavailable,
            _ => WebErrorKind::Internal,
        };
        Self {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}
