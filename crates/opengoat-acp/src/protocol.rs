//! ACP wire protocol: stdin/stdout JSON lines.
//!
//! Messages mirror the request/response/event shape of a Gateway frame,
//! tagged by `type` for line-delimited parsing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcpErrorCode {
    ParseError,
    InvalidParams,
    NotFound,
    Forbidden,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpError {
    pub code: AcpErrorCode,
    pub message: String,
}

impl AcpError {
    pub fn new(code: AcpErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Client ↔ server message on the JSON-lines wire.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcpMessage {
    /// Client → server request.
    Request {
        id: String,
        method: String,
        #[serde(default)]
        params: serde_json::Value,
    },
    /// Server → client response.
    Response {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<AcpError>,
    },
    /// Server → client event, used for streamed `agent_message_chunk`s and
    /// terminal `stopReason` notifications during `prompt`.
    Event {
        event: String,
        data: serde_json::Value,
    },
}

impl AcpMessage {
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self::Response { id: id.into(), result: Some(result), error: None }
    }

    pub fn err(id: impl Into<String>, error: AcpError) -> Self {
        Self::Response { id: id.into(), result: None, error: Some(error) }
    }

    pub fn event(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self::Event { event: event.into(), data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let msg = AcpMessage::Request {
            id: "1".into(),
            method: "prompt".into(),
            params: serde_json::json!({"sessionId": "s1", "message": "hi"}),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"request\""));
        let parsed: AcpMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            AcpMessage::Request { id, method, .. } => {
                assert_eq!(id, "1");
                assert_eq!(method, "prompt");
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn error_response_roundtrip() {
        let msg = AcpMessage::err("2", AcpError::new(AcpErrorCode::NotFound, "no such session"));
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: AcpMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            AcpMessage::Response { error: Some(e), .. } => assert_eq!(e.code, AcpErrorCode::NotFound),
            _ => panic!("expected error response"),
        }
    }

    #[test]
    fn event_roundtrip() {
        let msg = AcpMessage::event("agent_message_chunk", serde_json::json!({"text": "hi"}));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"event\""));
    }
}
