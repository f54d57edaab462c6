use crate::{controller::event_controller, controller::health_check_controller, stream, AppState};
use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use log::*;
use service::config::Config;
use tower_http::cors::CorsLayer;

pub fn define_routes(app_state: AppState) -> Router {
    let cors = cors_layer(&app_state.config);

    Router::new()
        .merge(event_routes(app_state))
        .merge(health_routes())
        .layer(cors)
}

fn event_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/events",
            get(stream::handler::sse_handler).post(event_controller::create),
        )
        .route("/events/connections", get(event_controller::index))
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

// Origins that fail to parse as header values are skipped rather than
// failing startup.
fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use clap::Parser;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_state() -> AppState {
        AppState::new(Config::parse_from(["stream_relay"]))
    }

    fn post_event(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/events")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = define_routes(app_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_broadcast_without_streams_reports_zero() {
        let response = define_routes(app_state())
            .oneshot(post_event(json!({"type": "price_updated", "data": {"cents": 5}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            json_body(response).await,
            json!({"status_code": 201, "data": {"delivered": 0, "failed": 0}})
        );
    }

    #[tokio::test]
    async fn test_broadcast_rejects_empty_type() {
        let response = define_routes(app_state())
            .oneshot(post_event(json!({"type": "  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_stream_greets_and_receives_broadcast() {
        let state = app_state();
        let router = define_routes(state.clone());

        let response = router
            .clone()
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(state.broadcaster.registry().count(), 1);

        let mut body = response.into_body();
        let greeting = next_frame(&mut body).await;
        assert!(greeting.contains("event: connected"));

        let response = router
            .oneshot(post_event(json!({"type": "file_uploaded", "data": {"name": "a.png"}})))
            .await
            .unwrap();
        assert_eq!(
            json_body(response).await["data"],
            json!({"delivered": 1, "failed": 0})
        );

        let frame = next_frame(&mut body).await;
        assert!(frame.contains("event: file_uploaded"));
        assert!(frame.contains(r#""name":"a.png""#));
    }

    #[tokio::test]
    async fn test_stream_refused_during_shutdown() {
        let state = app_state();
        state.broadcaster.stop_accepting();

        let response = define_routes(state.clone())
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.broadcaster.registry().count(), 0);
    }

    #[tokio::test]
    async fn test_terminate_ends_open_stream_bodies() {
        let state = app_state();
        let response = define_routes(state.clone())
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let mut body = response.into_body();
        assert!(next_frame(&mut body).await.contains("event: connected"));

        // Still registered, only the terminate signal ends it
        state.broadcaster.stop_accepting();
        state.broadcaster.terminate_streams();

        let end = tokio::time::timeout(std::time::Duration::from_secs(5), body.frame())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_connection_count_endpoint() {
        let state = app_state();
        let response = define_routes(state)
            .oneshot(
                Request::get("/events/connections")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(json_body(response).await["data"]["connections"], 0);
    }

    async fn next_frame(body: &mut Body) -> String {
        let frame = body.frame().await.unwrap().unwrap();
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }
}
