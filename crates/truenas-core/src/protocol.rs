//! DDP frame types.
//!
//! Every frame is one JSON object sent as a WebSocket text message, tagged by
//! its `msg` field:
//!
//! ```text
//! -> {"msg":"connect","version":"1","support":["1"]}
//! <- {"msg":"connected","session":"..."}
//! -> {"msg":"method","method":"auth.login_with_api_key","params":["..."],"id":"req1"}
//! <- {"msg":"result","id":"req1","result":true}
//! ```

use crate::config::ProtocolConfig;
use crate::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Correlation slot used for the `connected`/`failed` acknowledgment.
///
/// Never collides with call ids, which are always `req<N>`.
pub const HANDSHAKE_ID: &str = "ddp-connect";

/// Render the wire id for sequence number `seq`.
pub fn call_id(seq: u64) -> String {
    format!("req{}", seq)
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum OutboundFrame {
    Connect {
        version: String,
        support: Vec<String>,
    },
    Method {
        method: String,
        params: Value,
        id: String,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl OutboundFrame {
    /// The connection-initiation frame for the only supported DDP version.
    pub fn connect() -> Self {
        OutboundFrame::Connect {
            version: ProtocolConfig::DDP_VERSION.to_string(),
            support: ProtocolConfig::SUPPORTED_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
        }
    }

    pub fn method(method: impl Into<String>, params: Value, id: impl Into<String>) -> Self {
        OutboundFrame::Method {
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// Any frame received from the middleware.
///
/// Method responses, connection acknowledgments and collection events share
/// this shape; `msg` decides which fields are meaningful. A frame without
/// `msg` decodes with an empty tag and classifies as [`FrameKind::Other`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(default)]
    pub msg: String,
    /// Call id for responses; document id (often numeric) for collection events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
}

/// Classification of an inbound frame by its `msg` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Connected,
    Failed,
    Result,
    Error,
    Added,
    Changed,
    Removed,
    Ping,
    Other,
}

impl InboundFrame {
    /// The id as a string, when it is one.
    pub fn id_str(&self) -> Option<&str> {
        self.id.as_ref().and_then(Value::as_str)
    }

    pub fn kind(&self) -> FrameKind {
        match self.msg.as_str() {
            "connected" => FrameKind::Connected,
            "failed" => FrameKind::Failed,
            "result" => FrameKind::Result,
            "error" => FrameKind::Error,
            "added" => FrameKind::Added,
            "changed" => FrameKind::Changed,
            "removed" => FrameKind::Removed,
            "ping" => FrameKind::Ping,
            _ => FrameKind::Other,
        }
    }

    /// Turn a method response into the call's outcome.
    ///
    /// An `error` payload wins over `result`; a response with neither yields `Null`.
    pub fn into_outcome(self, method: &str) -> Result<Value> {
        if let Some(detail) = self.error {
            let message = format_remote_error(&detail);
            let full = detail.to_string();
            if message != full {
                tracing::debug!("{} full error payload: {}", method, full);
            }
            return Err(ClientError::Remote {
                method: method.to_string(),
                message,
                detail,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Extract the human-readable part of a middleware error payload.
///
/// Checks `reason`, then `message`, then the first validation entry of
/// `extra` (`[field, message, code]`), falling back to the raw JSON.
pub fn format_remote_error(error: &Value) -> String {
    let Some(obj) = error.as_object() else {
        return match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
    };

    for key in ["reason", "message"] {
        if let Some(text) = obj.get(key).and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }

    if let Some(entry) = obj
        .get("extra")
        .and_then(Value::as_array)
        .and_then(|extra| extra.first())
        .and_then(Value::as_array)
    {
        if entry.len() >= 2 {
            return format!("{}: {}", display_value(&entry[0]), display_value(&entry[1]));
        }
    }

    error.to_string()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_frame_wire_shape() {
        let value = serde_json::to_value(OutboundFrame::connect()).unwrap();
        assert_eq!(
            value,
            json!({"msg": "connect", "version": "1", "support": ["1"]})
        );
    }

    #[test]
    fn test_method_frame_wire_shape() {
        let frame = OutboundFrame::method("pool.query", json!([]), call_id(7));
        let value = serde_json::to_value(frame).unwrap();
        assert_eq!(
            value,
            json!({"msg": "method", "method": "pool.query", "params": [], "id": "req7"})
        );
    }

    #[test]
    fn test_pong_omits_missing_id() {
        let json = serde_json::to_string(&OutboundFrame::Pong { id: None }).unwrap();
        assert_eq!(json, r#"{"msg":"pong"}"#);
    }

    #[test]
    fn test_parse_connected_frame() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"msg":"connected","session":"abc"}"#).unwrap();
        assert_eq!(frame.kind(), FrameKind::Connected);
        assert_eq!(frame.session.as_deref(), Some("abc"));
        assert!(frame.id_str().is_none());
    }

    #[test]
    fn test_parse_collection_event() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"msg":"changed","collection":"core.get_jobs","id":12,"fields":{"state":"RUNNING"}}"#,
        )
        .unwrap();
        assert_eq!(frame.kind(), FrameKind::Changed);
        assert_eq!(frame.id, Some(json!(12)));
        assert!(frame.id_str().is_none());
        assert_eq!(frame.fields.unwrap()["state"], json!("RUNNING"));
    }

    #[test]
    fn test_unknown_msg_is_other() {
        let frame: InboundFrame = serde_json::from_str(r#"{"msg":"nosub","id":"x"}"#).unwrap();
        assert_eq!(frame.kind(), FrameKind::Other);
    }

    #[test]
    fn test_frame_without_msg_is_other() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"note":"frame without msg","id":"req1"}"#).unwrap();
        assert_eq!(frame.msg, "");
        assert_eq!(frame.kind(), FrameKind::Other);
    }

    #[test]
    fn test_non_json_frame_rejected() {
        assert!(serde_json::from_str::<InboundFrame>("this is not json").is_err());
    }

    #[test]
    fn test_outcome_success() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"msg":"result","id":"req1","result":true}"#).unwrap();
        assert_eq!(frame.into_outcome("ping").unwrap(), json!(true));
    }

    #[test]
    fn test_outcome_missing_result_is_null() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"msg":"result","id":"req1"}"#).unwrap();
        assert_eq!(frame.into_outcome("ping").unwrap(), Value::Null);
    }

    #[test]
    fn test_outcome_remote_error() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"msg":"result","id":"req1","error":{"message":"not found"}}"#,
        )
        .unwrap();
        match frame.into_outcome("pool.get_instance") {
            Err(ClientError::Remote {
                method, message, ..
            }) => {
                assert_eq!(method, "pool.get_instance");
                assert_eq!(message, "not found");
            }
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }

    #[test]
    fn test_format_prefers_reason() {
        let err = json!({"reason": "[EEXIST] already exists", "message": "ignored"});
        assert_eq!(format_remote_error(&err), "[EEXIST] already exists");
    }

    #[test]
    fn test_format_validation_extra() {
        let err = json!({
            "reason": "",
            "extra": [["vm_create.name", "Name must be unique", 22]]
        });
        assert_eq!(
            format_remote_error(&err),
            "vm_create.name: Name must be unique"
        );
    }

    #[test]
    fn test_format_fallback_to_json() {
        let err = json!({"errno": 2});
        assert_eq!(format_remote_error(&err), r#"{"errno":2}"#);
        assert_eq!(format_remote_error(&json!("plain")), "plain");
    }
}
