// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The event queue between request tasks and the record handler.
//!
//! With capacity `0` the queue is a rendezvous: [`EventSender::send`] returns only
//! after the consumer has taken the event. With capacity `N > 0` up to `N` events
//! are buffered and `send` waits only when the buffer is full. Events are delivered
//! in the order they were enqueued.
//!
//! The queue closes when every [`EventSender`] has been dropped; the receiver then
//! yields the remaining buffered events and finally `None`.

use tokio::sync::{mpsc, oneshot};

use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::record::Record;

/// A validated event ready to be persisted.
#[derive(Debug, Clone)]
pub struct EventData {
    /// The decoded envelope, including any trace context extensions.
    pub envelope: Envelope,
    /// The record projected from the envelope data.
    pub record: Record,
}

/// The receiver has gone away; the event was not accepted.
#[derive(Debug, thiserror::Error)]
#[error("event queue is closed")]
pub struct QueueClosed;

impl From<QueueClosed> for PipelineError {
    fn from(_: QueueClosed) -> Self {
        PipelineError::QueueClosed
    }
}

struct Delivery {
    event: EventData,
    taken: Option<oneshot::Sender<()>>,
}

/// Sending half of the event queue. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Delivery>,
    rendezvous: bool,
}

/// Receiving half of the event queue. There is exactly one.
pub struct EventReceiver {
    rx: mpsc::Receiver<Delivery>,
}

/// Create an event queue with the given capacity (`0` = rendezvous).
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let rendezvous = capacity == 0;
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx, rendezvous }, EventReceiver { rx })
}

impl EventSender {
    /// Enqueue an event, waiting for room (or, in rendezvous mode, for the consumer).
    pub async fn send(&self, event: EventData) -> Result<(), QueueClosed> {
        if !self.rendezvous {
            return self
                .tx
                .send(Delivery { event, taken: None })
                .await
                .map_err(|_| QueueClosed);
        }

        let (taken_tx, taken_rx) = oneshot::channel();
        self.tx
            .send(Delivery {
                event,
                taken: Some(taken_tx),
            })
            .await
            .map_err(|_| QueueClosed)?;
        // Dropped unacknowledged means the receiver went away with the event still queued.
        taken_rx.await.map_err(|_| QueueClosed)
    }

    /// Whether the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Take the next event. Returns `None` once all senders are gone and the
    /// buffer is empty.
    pub async fn recv(&mut self) -> Option<EventData> {
        let delivery = self.rx.recv().await?;
        if let Some(taken) = delivery.taken {
            let _ = taken.send(());
        }
        Some(delivery.event)
    }

    /// Take the next event if one is ready, without waiting.
    pub fn try_recv(&mut self) -> Option<EventData> {
        let delivery = self.rx.try_recv().ok()?;
        if let Some(taken) = delivery.taken {
            let _ = taken.send(());
        }
        Some(delivery.event)
    }
}
