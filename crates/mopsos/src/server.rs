// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP router.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /health` | liveness, always `{"ok":true}` |
//! | `GET /ready` | readiness, pings the record store |
//! | `POST /webhook` | [`crate::ingest::webhook`] |

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::auth::IdentityStore;
use crate::ingest;
use crate::persistence::RecordStore;
use crate::queue::EventSender;
use crate::trace_context;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// State shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Credential table for Basic auth.
    pub identities: Arc<IdentityStore>,
    /// Sending half of the event queue.
    pub events: EventSender,
    /// Record store, used by the readiness probe.
    pub store: Arc<dyn RecordStore>,
    /// Attach trace context to decoded envelopes.
    pub enable_tracing: bool,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/webhook", post(ingest::webhook))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Request span, parented on the caller's `traceparent` header when present.
fn request_span(request: &Request<Body>) -> Span {
    let span = tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        version = ?request.version(),
    );
    trace_context::set_parent_from_headers(&span, request.headers());
    span
}

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// Readiness probe: `503` while the store is unreachable.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "error": e.error_code() })),
            )
        }
    }
}
