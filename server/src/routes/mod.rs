//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The WebSocket listener carries the same delimiter-framed byte stream as
//! the raw TCP listener, one or more frames per WebSocket message, at
//! `GET /ws`. `GET /healthz` is a liveness check.

pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::dispatcher::Dispatcher;

pub fn app(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
