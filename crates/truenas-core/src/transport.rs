//! WebSocket transport for DDP frames.
//!
//! [`connect`] performs the WebSocket upgrade and splits the stream into a
//! [`FrameWriter`], shared by every caller, and a [`FrameReader`], owned by
//! the single receive loop.
//!
//! # Thread Safety
//!
//! The writer serializes sends through a tokio `Mutex`, so concurrent callers
//! never interleave frames. The reader is not shared: only one task reads.

use crate::config::SessionConfig;
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::{ClientError, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the WebSocket to the middleware described by `config`.
///
/// The upgrade carries the API key as a bearer token. Fails with
/// [`ClientError::Connect`] on network, TLS or upgrade failure, or when the
/// configured connect timeout elapses.
pub async fn connect(config: &SessionConfig) -> Result<(FrameWriter, FrameReader)> {
    let url = config.websocket_url()?.to_string();

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| connect_error(&url, e))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|_| {
        ClientError::Config {
            message: "API key is not a valid header value".to_string(),
        }
    })?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let connector = if config.tls {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .danger_accept_invalid_hostnames(config.accept_invalid_certs)
            .build()
            .map_err(|e| ClientError::Connect {
                url: url.clone(),
                message: format!("TLS setup failed: {}", e),
                source: None,
            })?;
        Connector::NativeTls(tls)
    } else {
        Connector::Plain
    };

    let (ws, response) = tokio::time::timeout(
        config.connect_timeout,
        connect_async_tls_with_config(request, None, false, Some(connector)),
    )
    .await
    .map_err(|_| ClientError::Connect {
        url: url.clone(),
        message: format!("timed out after {:?}", config.connect_timeout),
        source: None,
    })?
    .map_err(|e| connect_error(&url, e))?;

    debug!("WebSocket upgraded to {} ({})", url, response.status());

    let (sink, stream) = ws.split();
    Ok((FrameWriter::new(sink), FrameReader::new(stream)))
}

fn connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> ClientError {
    ClientError::Connect {
        url: url.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    }
}

/// Write half of the connection.
pub struct FrameWriter {
    sink: Mutex<SplitSink<WsStream, Message>>,
    closed: AtomicBool,
}

impl FrameWriter {
    fn new(sink: SplitSink<WsStream, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Serialize and write one frame.
    ///
    /// A failed write marks the writer closed; later sends fail fast.
    pub async fn send(&self, frame: &OutboundFrame) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::Send {
                message: "connection closed".to_string(),
            });
        }

        let text = serde_json::to_string(frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(text)).await.map_err(|e| {
            self.closed.store(true, Ordering::SeqCst);
            ClientError::Send {
                message: e.to_string(),
            }
        })
    }

    /// Refuse further sends without touching the socket.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a close frame and shut the write half. Idempotent.
    pub async fn close(&self) {
        self.mark_closed();
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("WebSocket close: {}", e);
        }
    }
}

/// Read half of the connection.
pub struct FrameReader {
    stream: SplitStream<WsStream>,
}

impl FrameReader {
    fn new(stream: SplitStream<WsStream>) -> Self {
        Self { stream }
    }

    /// Read the next DDP frame.
    ///
    /// Returns `None` once the peer closes the connection. WebSocket-level
    /// ping/pong is handled by tungstenite and skipped here.
    pub async fn next_frame(&mut self) -> Result<Option<InboundFrame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str())
                        .map(Some)
                        .map_err(|e| ClientError::Read {
                            message: format!("malformed frame: {}", e),
                        });
                }
                Some(Ok(Message::Binary(data))) => {
                    return serde_json::from_slice(&data)
                        .map(Some)
                        .map_err(|e| ClientError::Read {
                            message: format!("malformed frame: {}", e),
                        });
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(ClientError::Read {
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}
