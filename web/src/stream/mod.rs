//! SSE HTTP handler for the web layer.
//!
//! This module contains only the Axum handler for the stream endpoint.
//! The core SSE infrastructure (Broadcaster, ConnectionRegistry, heartbeats)
//! lives in the `sse` crate so producers can depend on it without the router.

pub mod handler;
