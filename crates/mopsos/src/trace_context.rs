// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! W3C trace context carried in CloudEvents extensions.
//!
//! The request span is parented on the caller's `traceparent` header. When the
//! event is decoded, the caller's trace is written to the envelope's `traceparent`
//! and `tracestate` extensions. The record handler reads it back so the database
//! write joins the trace of the request that produced it.

use axum::http::HeaderMap;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::TraceContextExt;
use opentelemetry::{Context, global};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::envelope::Envelope;

/// Extension holding the W3C `traceparent` value.
pub const TRACEPARENT: &str = "traceparent";
/// Extension holding the W3C `tracestate` value.
pub const TRACESTATE: &str = "tracestate";

struct EnvelopeInjector<'a>(&'a mut Envelope);

impl Injector for EnvelopeInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.set_extension(key, value);
    }
}

struct EnvelopeExtractor<'a>(&'a Envelope);

impl Extractor for EnvelopeExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.extension(key)
    }

    fn keys(&self) -> Vec<&str> {
        [TRACEPARENT, TRACESTATE]
            .into_iter()
            .filter(|k| self.0.extension(k).is_some())
            .collect()
    }
}

struct HttpHeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HttpHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

/// Read the caller's trace context from HTTP request headers.
pub fn extract_from_headers(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HttpHeaderExtractor(headers)))
}

/// Make `span` a child of the trace announced in the request headers.
pub fn set_parent_from_headers(span: &tracing::Span, headers: &HeaderMap) {
    let cx = extract_from_headers(headers);
    if cx.span().span_context().is_valid() {
        let _ = span.set_parent(cx);
    }
}

/// Record the caller's trace in the envelope extensions.
///
/// Precedence: the request span when it is part of a trace announced by the
/// request headers, then the header context itself, then a `traceparent` the
/// sender put in the envelope, and only then the request span as a new root.
pub fn inject_caller_context(headers: &HeaderMap, envelope: &mut Envelope) {
    let caller = extract_from_headers(headers);
    let caller_span = caller.span();
    let caller_sc = caller_span.span_context();
    let current = tracing::Span::current().context();
    let current_span = current.span();
    let current_sc = current_span.span_context();

    if caller_sc.is_valid() {
        if current_sc.is_valid() && current_sc.trace_id() == caller_sc.trace_id() {
            inject_context(&current, envelope);
        } else {
            inject_context(&caller, envelope);
        }
    } else if envelope.extension(TRACEPARENT).is_none() && current_sc.is_valid() {
        inject_context(&current, envelope);
    }
}

/// Write an OpenTelemetry context into the envelope extensions.
pub fn inject_context(cx: &Context, envelope: &mut Envelope) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut EnvelopeInjector(envelope));
    });
}

/// Read the trace context from the envelope extensions.
pub fn extract_context(envelope: &Envelope) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&EnvelopeExtractor(envelope)))
}

/// Make `span` a child of the trace recorded in the envelope.
pub fn set_parent_from_envelope(span: &tracing::Span, envelope: &Envelope) {
    let cx = extract_context(envelope);
    let _ = span.set_parent(cx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };
    use opentelemetry_sdk::propagation::TraceContextPropagator;

    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
    const SPAN_ID: &str = "b7ad6b7169203331";

    fn install_propagator() {
        global::set_text_map_propagator(TraceContextPropagator::new());
    }

    fn remote_context() -> Context {
        let span_context = SpanContext::new(
            TraceId::from_hex(TRACE_ID).unwrap(),
            SpanId::from_hex(SPAN_ID).unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        Context::new().with_remote_span_context(span_context)
    }

    #[test]
    fn test_inject_writes_traceparent_extension() {
        install_propagator();
        let mut envelope = Envelope::new("evt-1", "/test", "record");

        inject_context(&remote_context(), &mut envelope);

        assert_eq!(
            envelope.extension(TRACEPARENT),
            Some(format!("00-{TRACE_ID}-{SPAN_ID}-01").as_str())
        );
    }

    #[test]
    fn test_extract_reads_traceparent_extension() {
        install_propagator();
        let envelope = Envelope::new("evt-1", "/test", "record")
            .with_extension(TRACEPARENT, format!("00-{TRACE_ID}-{SPAN_ID}-01"));

        let cx = extract_context(&envelope);
        let span = cx.span();
        let span_context = span.span_context();

        assert!(span_context.is_valid());
        assert!(span_context.is_remote());
        assert_eq!(span_context.trace_id().to_string(), TRACE_ID);
        assert_eq!(span_context.span_id().to_string(), SPAN_ID);
    }

    #[test]
    fn test_extract_without_extensions_is_empty() {
        install_propagator();
        let envelope = Envelope::new("evt-1", "/test", "record");

        let cx = extract_context(&envelope);
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_extractor_keys_only_lists_present_extensions() {
        let envelope = Envelope::new("evt-1", "/test", "record")
            .with_extension(TRACEPARENT, "00-abc")
            .with_extension("unrelated", "x");

        let extractor = EnvelopeExtractor(&envelope);
        assert_eq!(extractor.keys(), vec![TRACEPARENT]);
        assert_eq!(extractor.get("unrelated"), Some("x"));
    }

    fn traceparent_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            TRACEPARENT,
            format!("00-{TRACE_ID}-{SPAN_ID}-01").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_extract_from_headers() {
        install_propagator();

        let cx = extract_from_headers(&traceparent_headers());
        let span = cx.span();
        assert!(span.span_context().is_remote());
        assert_eq!(span.span_context().trace_id().to_string(), TRACE_ID);

        let cx = extract_from_headers(&HeaderMap::new());
        assert!(!cx.span().span_context().is_valid());
    }

    #[test]
    fn test_caller_header_wins_over_envelope_extension() {
        install_propagator();
        let mut envelope = Envelope::new("evt-1", "/test", "record").with_extension(
            TRACEPARENT,
            "00-11111111111111111111111111111111-2222222222222222-01",
        );

        inject_caller_context(&traceparent_headers(), &mut envelope);

        assert_eq!(
            envelope.extension(TRACEPARENT),
            Some(format!("00-{TRACE_ID}-{SPAN_ID}-01").as_str())
        );
    }

    #[test]
    fn test_envelope_extension_kept_without_caller_header() {
        install_propagator();
        let sent = "00-11111111111111111111111111111111-2222222222222222-01";
        let mut envelope =
            Envelope::new("evt-1", "/test", "record").with_extension(TRACEPARENT, sent);

        inject_caller_context(&HeaderMap::new(), &mut envelope);

        assert_eq!(envelope.extension(TRACEPARENT), Some(sent));
    }

    #[test]
    fn test_span_helpers_do_not_panic_without_subscriber() {
        install_propagator();
        let mut envelope = Envelope::new("evt-1", "/test", "record");

        inject_caller_context(&HeaderMap::new(), &mut envelope);
        set_parent_from_envelope(&tracing::Span::current(), &envelope);
        set_parent_from_headers(&tracing::Span::current(), &HeaderMap::new());
    }
}
