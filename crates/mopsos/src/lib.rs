// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mopsos - CloudEvents Inventory Receiver
//!
//! This crate receives CloudEvents over HTTP from authenticated clusters and keeps the
//! latest known state of every application instance in a relational store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Reporting Clusters                                │
//! │                (CloudEvents over HTTP + Basic auth)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ POST /webhook
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Ingestion Pipeline                               │
//! │   authenticate ──► decode envelope ──► validate identity ──► dispatch    │
//! │   (Principal)        (Envelope)          (EventData)        202 / 503    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ event queue (rendezvous or bounded)
//!                                    ▼
//! ┌───────────────────────┐     ┌─────────────────────────────────────────┐
//! │   Record Handler      │────►│      SQLite / PostgreSQL (records)       │
//! │   (single consumer)   │     │  unique on cluster/instance/application  │
//! └───────────────────────┘     └─────────────────────────────────────────┘
//! ```
//!
//! # HTTP Interface
//!
//! | Route | Auth | Response |
//! |-------|------|----------|
//! | `GET /health` | none | `200 {"ok":true}` |
//! | `POST /webhook` | Basic | `202` empty, `401`/`500`/`503` plain text |
//!
//! # Pipeline Errors
//!
//! | Error | Status | Message |
//! |-------|--------|---------|
//! | `Unauthenticated` | 401 | missing Authorization header |
//! | `InvalidCredentials` | 401 | invalid credentials |
//! | `Decode` | 500 | failed to decode event: ... |
//! | `Unprocessable` | 500 | failed to unmarshal event data |
//! | `IdentityMismatch` | 401 | event data does not match username |
//! | `QueueClosed` | 503 | ingestion queue is closed |
//!
//! Storage failures happen after the response was sent. They are logged by the
//! record handler and never reach the client.
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the `MOPSOS_*` environment variables.

#![deny(missing_docs)]

/// HTTP Basic authentication against the configured credential table.
pub mod auth;

/// Service configuration loaded from environment variables.
pub mod config;

/// CloudEvents envelope decoding (structured and binary HTTP modes).
pub mod envelope;

/// Error types for the request pipeline and the storage layer.
pub mod error;

/// Background consumer that upserts records from the event queue.
pub mod handler;

/// Request pipeline stages and the webhook handler.
pub mod ingest;

/// Embedded database migrations.
pub mod migrations;

/// Record storage abstraction with SQLite and PostgreSQL backends.
pub mod persistence;

/// The event queue connecting request tasks to the record handler.
pub mod queue;

/// Inventory record types.
pub mod record;

/// Composition root: listener, queue, consumer and shutdown.
pub mod runtime;

/// HTTP router and shared application state.
pub mod server;

/// Tracing subscriber and OTLP exporter setup.
pub mod telemetry;

/// W3C trace context carried in envelope extensions.
pub mod trace_context;

pub use config::Config;
pub use error::{PipelineError, StoreError};
pub use runtime::IngestRuntime;
