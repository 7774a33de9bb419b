//! TrueNAS Client - DDP over WebSocket for the TrueNAS middleware.
//!
//! One [`Session`] holds one WebSocket connection. Any number of tasks can
//! issue method calls over it concurrently; a background receive loop routes
//! each response back to the call that requested it.
//!
//! # Example
//!
//! ```rust,ignore
//! use truenas_client::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> truenas_client::Result<()> {
//!     let session = Session::new(
//!         SessionConfig::new("nas.local", "1-abcdef").with_accept_invalid_certs(true),
//!     );
//!     session.connect().await?;
//!
//!     let pools = session.call("pool.query", serde_json::Value::Null).await?;
//!     println!("{}", pools);
//!
//!     session.close().await
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod error;
pub mod events;
pub mod jobs;
pub mod params;
pub mod protocol;
pub mod session;
pub mod transport;

mod receiver;
mod upload;

pub use config::{HttpConfig, ProtocolConfig, SessionConfig};
pub use correlation::PendingCalls;
pub use error::{ClientError, ConnectPhase, Result};
pub use events::{CollectionEvent, EventKind};
pub use jobs::JobResult;
pub use protocol::{format_remote_error, InboundFrame, OutboundFrame};
pub use session::{ConnectionState, Session};
