//! DDP session: handshake, authentication and the call dispatcher.
//!
//! A [`Session`] starts empty. [`Session::connect`] opens the WebSocket,
//! spawns the receive loop, waits for the `connected` acknowledgment and
//! logs in with the API key. After that any number of tasks may call methods
//! concurrently over the one connection; each call is correlated to its
//! response by a `req<N>` id minted from a session-wide counter.
//!
//! # Thread Safety
//!
//! `Session` is `Send + Sync` and meant to be shared behind an `Arc`. Sends
//! are serialized by the transport writer, the correlation table has its own
//! mutex, and the id counter is atomic.

use crate::config::{ProtocolConfig, SessionConfig};
use crate::correlation::{PendingCalls, PendingGuard};
use crate::events::{CollectionEvent, EventHub};
use crate::protocol::{call_id, FrameKind, InboundFrame, OutboundFrame, HANDSHAKE_ID};
use crate::{params, receiver, transport};
use crate::{ClientError, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the connect sequence stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    TransportUp,
    HandshakeSent,
    Authenticated,
    Failed,
}

/// One live connection: writer, correlation table and the receive loop task.
struct Link {
    writer: Arc<transport::FrameWriter>,
    pending: Arc<PendingCalls>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    fn is_alive(&self) -> bool {
        !self.writer.is_closed()
    }

    /// Send one method frame and wait for its response.
    async fn dispatch(
        &self,
        id: String,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.is_alive() {
            return Err(ClientError::Send {
                message: "connection closed".to_string(),
            });
        }

        let rx = self.pending.register(&id)?;
        let _guard = PendingGuard::new(&self.pending, &id);

        self.writer
            .send(&OutboundFrame::method(method, params, id.as_str()))
            .await?;
        debug!("-> {} {}", id, method);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => {
                debug!("<- {} {}", id, frame.msg);
                frame.into_outcome(method)
            }
            Ok(Err(_)) => Err(ClientError::SessionClosed),
            Err(_) => Err(ClientError::Timeout {
                method: method.to_string(),
                after: timeout,
            }),
        }
    }

    /// Release pending calls, close the socket and stop the receive loop.
    async fn shutdown(&self) {
        let released = self.pending.close_all();
        if released > 0 {
            debug!("Cancelled {} pending calls on close", released);
        }
        self.writer.close().await;
        if let Some(task) = self.take_reader_task() {
            task.abort();
        }
    }

    fn take_reader_task(&self) -> Option<JoinHandle<()>> {
        self.reader_task
            .lock()
            .expect("reader task lock poisoned")
            .take()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(task) = self.take_reader_task() {
            task.abort();
        }
    }
}

/// Client session against one middleware host.
pub struct Session {
    config: SessionConfig,
    link: RwLock<Option<Arc<Link>>>,
    state: Mutex<ConnectionState>,
    /// Serializes connect/close sequences.
    lifecycle: tokio::sync::Mutex<()>,
    /// Wakes an in-progress connect so `close` need not wait it out.
    close_requested: Notify,
    next_seq: AtomicU64,
    events: Arc<EventHub>,
}

impl Session {
    /// Create a session; no connection is made until [`connect`](Self::connect).
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            link: RwLock::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            lifecycle: tokio::sync::Mutex::new(()),
            close_requested: Notify::new(),
            next_seq: AtomicU64::new(1),
            events: Arc::new(EventHub::new(ProtocolConfig::EVENT_BUFFER)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        let state = *self.state.lock().expect("session state lock poisoned");
        if state == ConnectionState::Authenticated && !self.is_connected() {
            return ConnectionState::Disconnected;
        }
        state
    }

    /// Whether an authenticated connection is up and its receive loop running.
    pub fn is_connected(&self) -> bool {
        self.current_link().is_some_and(|link| link.is_alive())
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.current_link().map_or(0, |link| link.pending.len())
    }

    /// Receive collection events (`added`/`changed`/`removed`) from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CollectionEvent> {
        self.events.subscribe()
    }

    /// Open the connection, complete the DDP handshake and log in.
    ///
    /// On any failure the connection is torn down and the session stays
    /// unusable; [`ClientError::phase`] tells which step failed. A concurrent
    /// [`close`](Self::close) abandons the attempt with
    /// [`ClientError::SessionClosed`].
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let cancelled = self.close_requested.notified();

        if let Some(link) = self.current_link() {
            if link.is_alive() {
                return Err(ClientError::AlreadyConnected);
            }
            debug!("Discarding broken connection before connecting");
            self.take_link();
            link.shutdown().await;
        }

        self.set_state(ConnectionState::Disconnected);
        let outcome = tokio::select! {
            outcome = self.establish() => outcome,
            _ = cancelled => {
                // Dropping the half-built link stops its receive loop and socket.
                self.set_state(ConnectionState::Disconnected);
                info!("Connect to {} abandoned by close", self.config.host);
                return Err(ClientError::SessionClosed);
            }
        };
        match outcome {
            Ok(link) => {
                *self.link.write().expect("session link lock poisoned") = Some(link);
                self.set_state(ConnectionState::Authenticated);
                info!(
                    "DDP connection to {} established and authenticated",
                    self.config.host
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Failed);
                warn!("Connect to {} failed: {}", self.config.host, e);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<Arc<Link>> {
        let (writer, reader) = transport::connect(&self.config).await?;
        self.set_state(ConnectionState::TransportUp);

        let writer = Arc::new(writer);
        let pending = Arc::new(PendingCalls::new());

        // Register before the loop starts so the acknowledgment cannot be missed.
        let ack = pending.register(HANDSHAKE_ID)?;
        let task = tokio::spawn(receiver::run(
            reader,
            writer.clone(),
            pending.clone(),
            self.events.clone(),
        ));

        let link = Arc::new(Link {
            writer,
            pending,
            reader_task: Mutex::new(Some(task)),
        });

        let sequence = async {
            self.handshake(&link, ack).await?;
            self.authenticate(&link).await
        };
        if let Err(e) = sequence.await {
            link.shutdown().await;
            return Err(e);
        }

        Ok(link)
    }

    async fn handshake(&self, link: &Link, ack: oneshot::Receiver<InboundFrame>) -> Result<()> {
        let _guard = PendingGuard::new(&link.pending, HANDSHAKE_ID);

        link.writer
            .send(&OutboundFrame::connect())
            .await
            .map_err(|e| ClientError::Handshake {
                message: format!("failed to send connect: {}", e),
            })?;
        self.set_state(ConnectionState::HandshakeSent);

        let frame = match tokio::time::timeout(self.config.handshake_timeout, ack).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => {
                return Err(ClientError::Handshake {
                    message: "connection closed before acknowledgment".to_string(),
                })
            }
            Err(_) => {
                return Err(ClientError::Handshake {
                    message: format!(
                        "no acknowledgment within {:?}",
                        self.config.handshake_timeout
                    ),
                })
            }
        };

        match frame.kind() {
            FrameKind::Connected => {
                debug!(
                    "DDP session {} accepted",
                    frame.session.as_deref().unwrap_or("-")
                );
                Ok(())
            }
            _ => Err(ClientError::Handshake {
                message: format!(
                    "server rejected protocol version {} (suggested {})",
                    ProtocolConfig::DDP_VERSION,
                    frame.version.as_deref().unwrap_or("none")
                ),
            }),
        }
    }

    async fn authenticate(&self, link: &Link) -> Result<()> {
        let outcome = link
            .dispatch(
                self.next_call_id(),
                ProtocolConfig::AUTH_METHOD,
                Value::Array(vec![Value::String(self.config.api_key.clone())]),
                self.config.call_timeout,
            )
            .await;

        match outcome {
            Ok(Value::Bool(true)) => Ok(()),
            Ok(other) => Err(ClientError::Auth {
                message: format!("login returned {}", other),
                source: None,
            }),
            Err(e) => Err(ClientError::Auth {
                message: e.to_string(),
                source: Some(Box::new(e)),
            }),
        }
    }

    /// Call a method with params reshaped for the middleware's conventions.
    ///
    /// See [`params::shape_params`] for the per-method rules.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let params = params::shape_params(method, params)?;
        self.call_raw(method, params).await
    }

    /// Call a method with params sent exactly as given, using the default timeout.
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.config.call_timeout)
            .await
    }

    /// Call a method with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let link = self.current_link().ok_or(ClientError::NotConnected)?;
        link.dispatch(self.next_call_id(), method, params, timeout)
            .await
    }

    /// Close the connection. Idempotent; a no-op if never connected.
    ///
    /// Calls still waiting fail with [`ClientError::SessionClosed`]. A
    /// connect still in progress is abandoned rather than waited out.
    pub async fn close(&self) -> Result<()> {
        self.close_requested.notify_waiters();
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(link) = self.take_link() {
            link.shutdown().await;
            info!("Session to {} closed", self.config.host);
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn next_call_id(&self) -> String {
        call_id(self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn current_link(&self) -> Option<Arc<Link>> {
        self.link
            .read()
            .expect("session link lock poisoned")
            .clone()
    }

    fn take_link(&self) -> Option<Arc<Link>> {
        self.link
            .write()
            .expect("session link lock poisoned")
            .take()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        if *state != next {
            debug!("Session state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}
