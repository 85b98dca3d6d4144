// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for mopsos.
//!
//! [`PipelineError`] is raised while a webhook request is being processed and is
//! rendered to the client as a plain-text response. [`StoreError`] comes from the
//! storage layer; at runtime it only surfaces in the record handler's logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::envelope::EnvelopeError;

/// Errors that reject a webhook request before the event is queued.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// No usable Basic `Authorization` header.
    #[error("missing Authorization header")]
    Unauthenticated,

    /// Unknown user or wrong secret.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The request could not be decoded as a CloudEvent.
    #[error("failed to decode event: {0}")]
    Decode(#[from] EnvelopeError),

    /// The event data could not be projected into a record.
    #[error("failed to unmarshal event data")]
    Unprocessable {
        /// Why the projection failed. Logged, not sent to the client.
        reason: String,
    },

    /// The record's cluster does not belong to the authenticated user.
    #[error("event data does not match username")]
    IdentityMismatch {
        /// The authenticated username.
        principal: String,
        /// The cluster name claimed by the record.
        cluster_name: String,
    },

    /// The ingestion queue no longer accepts events (shutdown in progress).
    #[error("ingestion queue is closed")]
    QueueClosed,
}

impl PipelineError {
    /// HTTP status used when this error is returned to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials | Self::IdentityMismatch { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::Decode(_) | Self::Unprocessable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Decode(_) => "DECODE_FAILED",
            Self::Unprocessable { .. } => "UNPROCESSABLE_DATA",
            Self::IdentityMismatch { .. } => "IDENTITY_MISMATCH",
            Self::QueueClosed => "QUEUE_CLOSED",
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Storage layer errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The configured provider name is not one of the shipped backends.
    #[error("database provider '{0}' is not implemented")]
    UnsupportedProvider(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying the embedded migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}
