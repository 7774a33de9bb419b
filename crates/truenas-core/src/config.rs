//! Centralized configuration for the TrueNAS client.
//!
//! Protocol constants live on the `*Config` holder structs; per-session
//! settings are carried by [`SessionConfig`].

use crate::{ClientError, Result};
use std::time::Duration;

/// DDP protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const DDP_VERSION: &'static str = "1";
    pub const SUPPORTED_VERSIONS: &'static [&'static str] = &["1"];
    pub const WEBSOCKET_PATH: &'static str = "/websocket";

    // Timeouts
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);
    pub const HANDSHAKE_ACK_TIMEOUT: Duration = Duration::from_secs(10);

    // Method names
    pub const AUTH_METHOD: &'static str = "auth.login_with_api_key";
    pub const JOB_WAIT_METHOD: &'static str = "core.job_wait";
    pub const SUBSCRIBE_METHOD: &'static str = "core.subscribe";
    pub const JOBS_COLLECTION: &'static str = "core.get_jobs";

    /// Capacity of the collection event hub; slow subscribers lose events past this.
    pub const EVENT_BUFFER: usize = 64;
}

/// HTTP side-channel configuration.
pub struct HttpConfig;

impl HttpConfig {
    pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = "truenas-client/0.3";
}

/// Settings for one [`Session`](crate::Session).
#[derive(Clone)]
pub struct SessionConfig {
    /// Host (and optional port) of the middleware, without scheme.
    pub host: String,
    /// API key used both as bearer token and for `auth.login_with_api_key`.
    pub api_key: String,
    /// Use `wss://`/`https://`; disable only for local test servers.
    pub tls: bool,
    /// Accept self-signed or otherwise invalid certificates.
    pub accept_invalid_certs: bool,
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            api_key: api_key.into(),
            tls: true,
            accept_invalid_certs: false,
            call_timeout: ProtocolConfig::DEFAULT_CALL_TIMEOUT,
            connect_timeout: ProtocolConfig::CONNECT_TIMEOUT,
            handshake_timeout: ProtocolConfig::HANDSHAKE_ACK_TIMEOUT,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// WebSocket endpoint, e.g. `wss://nas.local/websocket`.
    pub fn websocket_url(&self) -> Result<url::Url> {
        let scheme = if self.tls { "wss" } else { "ws" };
        self.endpoint(scheme, ProtocolConfig::WEBSOCKET_PATH)
    }

    /// HTTP endpoint on the same host, e.g. `https://nas.local/_upload`.
    pub fn http_url(&self, path: &str) -> Result<url::Url> {
        let scheme = if self.tls { "https" } else { "http" };
        self.endpoint(scheme, path)
    }

    fn endpoint(&self, scheme: &str, path: &str) -> Result<url::Url> {
        if self.host.is_empty() || self.host.contains('/') {
            return Err(ClientError::Config {
                message: format!("invalid host {:?}", self.host),
            });
        }
        let raw = format!("{}://{}{}", scheme, self.host, path);
        url::Url::parse(&raw).map_err(|e| ClientError::Config {
            message: format!("invalid endpoint {}: {}", raw, e),
        })
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("api_key", &"<redacted>")
            .field("tls", &self.tls)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("call_timeout", &self.call_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}
