//! Background receive loop.
//!
//! One task per connection reads frames and routes them:
//!
//! - `result`/`error` with a call id → the matching pending call
//! - `connected`/`failed` → the handshake slot
//! - `added`/`changed`/`removed` → the collection event hub
//! - `ping` → answered with `pong` from a spawned task
//!
//! Anything else, and responses nobody waits for, is dropped. When the
//! connection ends the writer is marked closed and every pending call is
//! released, so waiters fail immediately instead of timing out.

use crate::correlation::PendingCalls;
use crate::events::{CollectionEvent, EventHub};
use crate::protocol::{FrameKind, InboundFrame, OutboundFrame, HANDSHAKE_ID};
use crate::transport::{FrameReader, FrameWriter};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) async fn run(
    mut reader: FrameReader,
    writer: Arc<FrameWriter>,
    pending: Arc<PendingCalls>,
    events: Arc<EventHub>,
) {
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                if let Some(reply) = route(frame, &pending, &events) {
                    // The writer may be busy with a caller's send; don't hold up routing.
                    let writer = writer.clone();
                    tokio::spawn(async move {
                        if let Err(e) = writer.send(&reply).await {
                            debug!("Failed to answer ping: {}", e);
                        }
                    });
                }
            }
            Ok(None) => {
                info!("Middleware closed the connection");
                break;
            }
            Err(e) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        }
    }

    writer.mark_closed();
    let released = pending.close_all();
    if released > 0 {
        debug!("Released {} pending calls after disconnect", released);
    }
}

/// Route one frame; returns a frame to send back, if any.
fn route(frame: InboundFrame, pending: &PendingCalls, events: &EventHub) -> Option<OutboundFrame> {
    match frame.kind() {
        FrameKind::Result | FrameKind::Error => {
            match frame.id_str().map(str::to_owned) {
                Some(id) => {
                    pending.fulfill(&id, frame);
                }
                None => debug!("Dropping {} frame without call id", frame.msg),
            }
            None
        }
        FrameKind::Connected | FrameKind::Failed => {
            pending.fulfill(HANDSHAKE_ID, frame);
            None
        }
        FrameKind::Added | FrameKind::Changed | FrameKind::Removed => {
            if let Some(event) = CollectionEvent::from_frame(frame) {
                events.publish(event);
            }
            None
        }
        FrameKind::Ping => Some(OutboundFrame::Pong {
            id: frame.id_str().map(str::to_owned),
        }),
        FrameKind::Other if frame.msg.is_empty() => {
            debug!("Ignoring frame without msg");
            None
        }
        FrameKind::Other => {
            debug!("Ignoring {} frame", frame.msg);
            None
        }
    }
}
