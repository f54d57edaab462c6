use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::controller::ApiResponse;
use crate::{AppState, Error};
use events::Event;
use log::*;

/// Request body for broadcasting an event to every open stream.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl BroadcastRequest {
    fn validate(&self) -> Result<(), Error> {
        if self.event_type.trim().is_empty() {
            return Err(Error::invalid("event type must not be empty"));
        }
        if self.event_type.contains(&['\n', '\r'][..]) {
            return Err(Error::invalid("event type must be a single line"));
        }
        Ok(())
    }
}

/// POST broadcast an event to all connected streams.
///
/// Fire-and-forget: the response reports how many streams were written to,
/// not whether any client received the event.
pub async fn create(
    State(app_state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<impl IntoResponse, Error> {
    request.validate()?;
    debug!("POST Broadcast event of type {}", request.event_type);

    let event = Event::new(request.event_type, request.data);
    let report = app_state.broadcaster.broadcast(&event);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(StatusCode::CREATED.into(), report)),
    ))
}

/// GET the number of currently registered streams
pub async fn index(State(app_state): State<AppState>) -> impl IntoResponse {
    let connections = app_state.broadcaster.registry().count();

    Json(ApiResponse::new(
        StatusCode::OK.into(),
        json!({ "connections": connections }),
    ))
}
