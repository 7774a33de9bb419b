//! Collection events pushed by the middleware.
//!
//! After a `core.subscribe` call the middleware streams `added`, `changed`
//! and `removed` frames for the subscribed collection. The receive loop
//! publishes them on a broadcast hub; subscribers that fall behind lose the
//! oldest events instead of stalling the loop.

use crate::protocol::{FrameKind, InboundFrame};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Changed,
    Removed,
}

/// One document change in a subscribed collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEvent {
    pub kind: EventKind,
    pub collection: String,
    /// Document id; numeric for jobs.
    pub id: Option<Value>,
    pub fields: Map<String, Value>,
}

impl CollectionEvent {
    /// Build an event from an `added`/`changed`/`removed` frame.
    pub fn from_frame(frame: InboundFrame) -> Option<Self> {
        let kind = match frame.kind() {
            FrameKind::Added => EventKind::Added,
            FrameKind::Changed => EventKind::Changed,
            FrameKind::Removed => EventKind::Removed,
            _ => return None,
        };

        Some(Self {
            kind,
            collection: frame.collection.unwrap_or_default(),
            id: frame.id,
            fields: frame.fields.unwrap_or_default(),
        })
    }
}

/// Fan-out point for collection events.
pub struct EventHub {
    tx: broadcast::Sender<CollectionEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; returns how many received it.
    pub fn publish(&self, event: CollectionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
