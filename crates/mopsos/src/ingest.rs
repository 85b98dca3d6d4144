// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook request pipeline.
//!
//! ```text
//! Authorization ──► authenticate ──► Principal
//! headers + body ─► decode_envelope ──► Envelope
//! (Principal, Envelope) ──► validate_identity ──► EventData
//! EventData ──► dispatch ──► event queue ──► 202 Accepted
//! ```
//!
//! Every stage returns a [`PipelineError`] on failure, which ends the request
//! with the status and plain-text message of that error.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{Instrument, debug, error, warn};

use crate::auth::{self, Principal};
use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::queue::{EventData, EventSender};
use crate::record::Record;
use crate::server::AppState;
use crate::trace_context;

/// Decode the request into an envelope, attaching the caller's trace context
/// when tracing is enabled.
pub fn decode_envelope(
    headers: &HeaderMap,
    body: &[u8],
    enable_tracing: bool,
) -> Result<Envelope, PipelineError> {
    let mut envelope = Envelope::from_http(headers, body).map_err(|e| {
        error!(error = %e, "Failed to decode event");
        PipelineError::from(e)
    })?;

    if enable_tracing {
        trace_context::inject_caller_context(headers, &mut envelope);
    }

    debug!(
        event_id = %envelope.id(),
        event_type = %envelope.ty(),
        source = %envelope.source(),
        spec_version = %envelope.spec_version(),
        data_content_type = envelope.data_content_type().unwrap_or_default(),
        "Received event"
    );
    Ok(envelope)
}

/// Project the envelope data into a [`Record`] and check that it belongs to the
/// authenticated principal.
pub fn validate_identity(
    principal: &Principal,
    envelope: Envelope,
) -> Result<EventData, PipelineError> {
    let record = envelope
        .data_as::<Record>()
        .map_err(|e| {
            error!(event_id = %envelope.id(), error = %e, "Failed to unmarshal event data");
            PipelineError::Unprocessable {
                reason: e.to_string(),
            }
        })?
        .unwrap_or_default();

    if record.cluster_name != principal.as_str() {
        warn!(
            event_id = %envelope.id(),
            principal = %principal,
            cluster_name = %record.cluster_name,
            "Event data does not match username"
        );
        return Err(PipelineError::IdentityMismatch {
            principal: principal.to_string(),
            cluster_name: record.cluster_name,
        });
    }

    Ok(EventData { envelope, record })
}

/// Hand the event to the record handler.
///
/// The enqueue runs in its own task so a client disconnect cannot abandon an
/// event half way into the queue.
pub async fn dispatch(events: &EventSender, event: EventData) -> Result<(), PipelineError> {
    let events = events.clone();
    let event_id = event.envelope.id().to_string();

    let handoff = tokio::spawn(async move { events.send(event).await }.in_current_span());
    match handoff.await {
        Ok(Ok(())) => {
            debug!(event_id = %event_id, "Event queued");
            Ok(())
        }
        Ok(Err(e)) => {
            warn!(event_id = %event_id, error = %e, "Rejecting event, queue is closed");
            Err(e.into())
        }
        Err(e) => {
            error!(event_id = %event_id, error = %e, "Event handoff task failed");
            Err(PipelineError::QueueClosed)
        }
    }
}

/// `POST /webhook`
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, PipelineError> {
    let principal = auth::authenticate(&headers, &state.identities).map_err(|e| {
        warn!(error_code = e.error_code(), error = %e, "Rejecting webhook request");
        e
    })?;

    let envelope = decode_envelope(&headers, &body, state.enable_tracing)?;
    let event = validate_identity(&principal, envelope)?;
    dispatch(&state.events, event).await?;

    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;

    use crate::auth::IdentityStore;
    use crate::persistence::mock::MockRecordStore;
    use crate::queue::{EventReceiver, event_queue};

    fn state(capacity: usize) -> (AppState, EventReceiver) {
        let (events, receiver) = event_queue(capacity);
        let state = AppState {
            identities: Arc::new(IdentityStore::new(HashMap::from([(
                "username".to_string(),
                "password".to_string(),
            )]))),
            events,
            store: Arc::new(MockRecordStore::default()),
            enable_tracing: false,
        };
        (state, receiver)
    }

    fn headers(credentials: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/cloudevents+json"),
        );
        if let Some(credentials) = credentials {
            let value = format!("Basic {}", BASE64.encode(credentials));
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        }
        headers
    }

    fn structured(data: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{"specversion":"1.0","id":"evt-1","source":"/test","type":"test","datacontenttype":"application/json","data":{data}}}"#
        ))
    }

    #[test]
    fn test_validate_identity_accepts_matching_cluster() {
        let envelope = decode_envelope(
            &headers(None),
            &structured(r#"{"cluster_name":"username"}"#),
            false,
        )
        .unwrap();

        let event = validate_identity(&Principal::new("username"), envelope).unwrap();
        assert_eq!(event.record.cluster_name, "username");
        assert_eq!(event.record.application_name, "");
        assert_eq!(event.envelope.id(), "evt-1");
    }

    #[test]
    fn test_validate_identity_rejects_other_cluster() {
        let envelope = decode_envelope(
            &headers(None),
            &structured(r#"{"cluster_name":"invalid"}"#),
            false,
        )
        .unwrap();

        let err = validate_identity(&Principal::new("username"), envelope).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(matches!(
            err,
            PipelineError::IdentityMismatch { ref cluster_name, .. } if cluster_name == "invalid"
        ));
    }

    #[test]
    fn test_validate_identity_rejects_non_json_data() {
        let body = br#"{"specversion":"1.0","type":"test","datacontenttype":"test/plain","data":"this is not json"}"#;
        let envelope = decode_envelope(&headers(None), body, false).unwrap();

        let err = validate_identity(&Principal::new("username"), envelope).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "failed to unmarshal event data");
    }

    #[test]
    fn test_validate_identity_without_data_is_mismatch() {
        let envelope = Envelope::new("evt-1", "/test", "test");
        let err = validate_identity(&Principal::new("username"), envelope).unwrap_err();
        assert!(matches!(err, PipelineError::IdentityMismatch { .. }));
    }

    #[test]
    fn test_decode_envelope_carries_caller_trace() {
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
        let caller = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        let mut headers = headers(None);
        headers.insert("traceparent", HeaderValue::from_static(caller));

        let envelope = decode_envelope(
            &headers,
            &structured(r#"{"cluster_name":"username"}"#),
            true,
        )
        .unwrap();
        assert_eq!(envelope.extension(trace_context::TRACEPARENT), Some(caller));

        let envelope = decode_envelope(
            &headers,
            &structured(r#"{"cluster_name":"username"}"#),
            false,
        )
        .unwrap();
        assert!(envelope.extension(trace_context::TRACEPARENT).is_none());
    }

    #[test]
    fn test_decode_envelope_failure_is_500() {
        let err = decode_envelope(&headers(None), b"{not json", false).unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_webhook_accepts_and_queues_event() {
        let (state, mut receiver) = state(4);

        let status = webhook(
            State(state),
            headers(Some("username:password")),
            structured(r#"{"cluster_name":"username","application_version":"1.0"}"#),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.record.application_version, "1.0");
    }

    #[tokio::test]
    async fn test_webhook_rendezvous_waits_for_consumer() {
        let (state, mut receiver) = state(0);

        let consumer = tokio::spawn(async move { receiver.recv().await });
        let status = webhook(
            State(state),
            headers(Some("username:password")),
            structured(r#"{"cluster_name":"username"}"#),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(consumer.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_webhook_rejects_before_decoding() {
        let (state, mut receiver) = state(4);

        let err = webhook(State(state.clone()), headers(None), Bytes::from_static(b"garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unauthenticated));

        let err = webhook(
            State(state),
            headers(Some("username:wrong")),
            Bytes::from_static(b"garbage"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCredentials));

        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_webhook_queue_closed_is_503() {
        let (state, receiver) = state(4);
        drop(receiver);

        let err = webhook(
            State(state),
            headers(Some("username:password")),
            structured(r#"{"cluster_name":"username"}"#),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::QueueClosed));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
