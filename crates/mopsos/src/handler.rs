// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record handler: the single consumer of the event queue.
//!
//! Each event is upserted once. Storage failures are logged with the event id and
//! the loop moves on; the client already received its 202.

use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span};

use crate::error::StoreError;
use crate::persistence::RecordStore;
use crate::queue::{EventData, EventReceiver};
use crate::trace_context;

/// Outcome counters of a finished handler loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerSummary {
    /// Events upserted successfully.
    pub persisted: u64,
    /// Events whose upsert failed.
    pub failed: u64,
}

/// Persists queued events into a [`RecordStore`].
#[derive(Clone)]
pub struct RecordHandler {
    store: Arc<dyn RecordStore>,
    enable_tracing: bool,
}

impl RecordHandler {
    /// Create a handler. With `enable_tracing` each upsert span is parented to the
    /// trace context carried by the envelope.
    pub fn new(store: Arc<dyn RecordStore>, enable_tracing: bool) -> Self {
        Self {
            store,
            enable_tracing,
        }
    }

    /// Upsert the record of a single event.
    pub async fn handle_event(&self, event: &EventData) -> Result<(), StoreError> {
        let span = info_span!(
            "persist_record",
            event_id = %event.envelope.id(),
            cluster_name = %event.record.cluster_name,
            application_name = %event.record.application_name,
        );
        if self.enable_tracing {
            trace_context::set_parent_from_envelope(&span, &event.envelope);
        }

        async {
            self.store.upsert_record(&event.record).await?;
            debug!(
                application_version = %event.record.application_version,
                "Record upserted"
            );
            Ok::<_, StoreError>(())
        }
        .instrument(span)
        .await
    }

    /// Consume events until every sender is dropped and the queue is empty.
    pub async fn run(self, mut events: EventReceiver) -> HandlerSummary {
        info!(tracing = self.enable_tracing, "Record handler started");

        let mut summary = HandlerSummary::default();
        while let Some(event) = events.recv().await {
            match self.handle_event(&event).await {
                Ok(()) => summary.persisted += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        event_id = %event.envelope.id(),
                        cluster_name = %event.record.cluster_name,
                        error_code = e.error_code(),
                        error = %e,
                        "Failed to persist record"
                    );
                }
            }
        }

        info!(
            persisted = summary.persisted,
            failed = summary.failed,
            "Record handler stopped"
        );
        summary
    }
}
