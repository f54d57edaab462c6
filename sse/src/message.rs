use crate::connection::ConnectionId;
use crate::error::Error;
use axum::response::sse::Event as SseEvent;
use events::{reserved, Event};
use serde_json::json;

/// Convert an event into an SSE frame. The SSE `event:` name mirrors the
/// JSON `type` field carried in `data:`.
pub fn to_sse_event(event: &Event) -> Result<SseEvent, Error> {
    let event_type = event.event_type();
    // axum panics on line breaks in the event name, reject them up front
    if event_type.contains(&['\n', '\r'][..]) {
        return Err(Error::serialization(format!(
            "event type {event_type:?} contains a line break"
        )));
    }

    let data = event.to_frame()?;
    Ok(SseEvent::default().event(event_type).data(data))
}

/// Greeting sent to a freshly registered stream.
pub fn connected(connection_id: &ConnectionId, connections: usize) -> Event {
    Event::new(
        reserved::CONNECTED,
        json!({
            "connection_id": connection_id.as_str(),
            "connections": connections,
        }),
    )
}

pub fn heartbeat(connection_id: &ConnectionId) -> Event {
    Event::new(
        reserved::HEARTBEAT,
        json!({ "connection_id": connection_id.as_str() }),
    )
}

pub fn server_shutdown(reason: &str) -> Event {
    Event::new(reserved::SERVER_SHUTDOWN, json!({ "reason": reason }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, TransportErrorKind};

    #[test]
    fn test_connected_event_carries_id_and_count() {
        let id = ConnectionId::new();
        let event = connected(&id, 3);

        assert_eq!(event.event_type(), "connected");
        assert_eq!(event.data()["connection_id"], id.as_str());
        assert_eq!(event.data()["connections"], 3);
    }

    #[test]
    fn test_event_type_with_newline_is_rejected() {
        let event = Event::new("bad\ntype", serde_json::Value::Null);
        let err = to_sse_event(&event).unwrap_err();

        assert_eq!(
            err.error_kind,
            ErrorKind::Transport(TransportErrorKind::Serialization)
        );
    }

    #[test]
    fn test_shutdown_event_is_reserved_type() {
        let event = server_shutdown("maintenance");
        assert_eq!(event.event_type(), reserved::SERVER_SHUTDOWN);
        assert_eq!(event.data()["reason"], "maintenance");
        assert!(to_sse_event(&event).is_ok());
    }
}
