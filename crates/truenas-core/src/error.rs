//! Error types for the TrueNAS client.
//!
//! One error enum covers every phase of a session: establishing the
//! WebSocket, the DDP handshake, authentication, individual method calls,
//! and the HTTP upload side channel.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the TrueNAS client.
#[derive(Debug, Error)]
pub enum ClientError {
    // Connection establishment
    #[error("WebSocket connect to {url} failed: {message}")]
    Connect {
        url: String,
        message: String,
        #[source]
        source: Option<Box<tokio_tungstenite::tungstenite::Error>>,
    },

    #[error("DDP handshake failed: {message}")]
    Handshake { message: String },

    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        #[source]
        source: Option<Box<ClientError>>,
    },

    // Call path
    #[error("Failed to send frame: {message}")]
    Send { message: String },

    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    #[error("{method} failed: {message}")]
    Remote {
        method: String,
        message: String,
        /// Full error payload as returned by the middleware.
        detail: serde_json::Value,
    },

    #[error("Failed to read frame: {message}")]
    Read { message: String },

    #[error("Session closed before a response arrived")]
    SessionClosed,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Call id {id} is already pending")]
    DuplicateCallId { id: String },

    #[error("Invalid params for {method}: {message}")]
    InvalidParams { method: String, message: String },

    // Jobs
    #[error("Job {job_id} {state}: {message}")]
    Job {
        job_id: i64,
        state: String,
        message: String,
    },

    // HTTP side channel
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    // Serialization
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Phase of [`Session::connect`](crate::Session::connect) that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectPhase {
    Transport,
    Handshake,
    Auth,
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ClientError {
    /// Which connect phase this error belongs to, if any.
    pub fn phase(&self) -> Option<ConnectPhase> {
        match self {
            ClientError::Connect { .. } => Some(ConnectPhase::Transport),
            ClientError::Handshake { .. } => Some(ConnectPhase::Handshake),
            ClientError::Auth { .. } => Some(ConnectPhase::Auth),
            _ => None,
        }
    }

    /// Errors caused by the connection rather than the remote method.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. }
                | ClientError::Send { .. }
                | ClientError::Read { .. }
                | ClientError::SessionClosed
                | ClientError::NotConnected
        )
    }

    /// Check if this error should trigger a retry.
    ///
    /// Remote errors are never retryable: the middleware already answered.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Timeout { .. }
                | ClientError::Send { .. }
                | ClientError::SessionClosed
                | ClientError::Network { .. }
        )
    }
}
