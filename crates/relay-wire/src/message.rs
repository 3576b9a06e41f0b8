//! Wire envelope for calls carried over a channel.
//!
//! Every payload sent by a proxy or stub is one [`WireMessage`], encoded as
//! JSON and prefixed with a 4-byte big-endian length header. Endpoints that
//! travel with a message are not part of the JSON; the envelope only records
//! how many are attached so the receiver can check nothing went missing.

use relay_types::{ApplicationError, RelayError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors raised while framing or moving wire messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Truncated message: header says {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Message declares {declared} endpoints but carries {actual}")]
    EndpointCountMismatch { declared: usize, actual: usize },
}

impl From<WireError> for RelayError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::ConnectionClosed => RelayError::ChannelClosed,
            other => RelayError::Decode(other.to_string()),
        }
    }
}

/// A wire protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// A method call expecting a reply with the same `call_id`.
    #[serde(rename = "request")]
    Request {
        call_id: u64,
        method: String,
        #[serde(default)]
        params: Value,
        /// Number of endpoints attached to the carrying message.
        #[serde(default)]
        endpoints: usize,
    },
    /// Reply to a request.
    #[serde(rename = "response")]
    Response { call_id: u64, result: CallResult },
    /// One-way call, no reply.
    #[serde(rename = "notification")]
    Notification {
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        endpoints: usize,
    },
}

impl WireMessage {
    /// How many endpoints the sender attached.
    pub fn endpoint_count(&self) -> usize {
        match self {
            WireMessage::Request { endpoints, .. } | WireMessage::Notification { endpoints, .. } => {
                *endpoints
            }
            WireMessage::Response { .. } => 0,
        }
    }
}

/// The body of a reply: a value, or an application-level failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallResult {
    Ok(Value),
    Err(ApplicationError),
}

impl From<Result<Value, ApplicationError>> for CallResult {
    fn from(result: Result<Value, ApplicationError>) -> Self {
        match result {
            Ok(v) => CallResult::Ok(v),
            Err(e) => CallResult::Err(e),
        }
    }
}

impl From<CallResult> for Result<Value, ApplicationError> {
    fn from(result: CallResult) -> Self {
        match result {
            CallResult::Ok(v) => Ok(v),
            CallResult::Err(e) => Err(e),
        }
    }
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage, max_size: u32) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(msg)?;
    let len = u32::try_from(json.len()).unwrap_or(u32::MAX);
    if len > max_size {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a framed payload into a WireMessage.
pub fn decode_message(bytes: &[u8], max_size: u32) -> Result<WireMessage, WireError> {
    if bytes.len() < 4 {
        return Err(WireError::Truncated {
            expected: 4,
            actual: bytes.len(),
        });
    }
    let (header, body) = bytes.split_at(4);
    let len = decode_length(&[header[0], header[1], header[2], header[3]]);
    if len > max_size {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }
    if body.len() != len as usize {
        return Err(WireError::Truncated {
            expected: len as usize,
            actual: body.len(),
        });
    }
    Ok(serde_json::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::config::DEFAULT_MAX_MESSAGE_SIZE;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = WireMessage::Request {
            call_id: 7,
            method: "echoString".to_string(),
            params: json!({"value": "hello"}),
            endpoints: 0,
        };
        let bytes = encode_message(&msg, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        let decoded = decode_message(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_error_response() {
        let msg = WireMessage::Response {
            call_id: 3,
            result: CallResult::Err(ApplicationError::unknown_method("examples.Echo", "nope")),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"response\""));
        let decoded: WireMessage = serde_json::from_str(&json).unwrap();
        match decoded {
            WireMessage::Response {
                call_id,
                result: CallResult::Err(err),
            } => {
                assert_eq!(call_id, 3);
                assert_eq!(err.code, 404);
            }
            other => panic!("Expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_defaults() {
        let decoded: WireMessage =
            serde_json::from_str(r#"{"type":"notification","method":"quit"}"#).unwrap();
        assert_eq!(
            decoded,
            WireMessage::Notification {
                method: "quit".to_string(),
                params: Value::Null,
                endpoints: 0,
            }
        );
        assert_eq!(decoded.endpoint_count(), 0);
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let msg = WireMessage::Notification {
            method: "ping".to_string(),
            params: Value::Null,
            endpoints: 0,
        };
        let bytes = encode_message(&msg, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        let err = decode_message(&bytes[..bytes.len() - 1], DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
        assert!(matches!(
            decode_message(&[0, 0], DEFAULT_MAX_MESSAGE_SIZE),
            Err(WireError::Truncated { expected: 4, .. })
        ));
    }

    #[test]
    fn test_size_limit() {
        let msg = WireMessage::Notification {
            method: "ping".to_string(),
            params: json!("x".repeat(64)),
            endpoints: 0,
        };
        assert!(matches!(
            encode_message(&msg, 16),
            Err(WireError::MessageTooLarge { max: 16, .. })
        ));
        let bytes = encode_message(&msg, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(matches!(
            decode_message(&bytes, 16),
            Err(WireError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let mut bytes = 5u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"nope!");
        let err = decode_message(&bytes, DEFAULT_MAX_MESSAGE_SIZE).unwrap_err();
        assert!(matches!(err, WireError::Json(_)));
        assert!(matches!(RelayError::from(err), RelayError::Decode(_)));
        assert!(RelayError::from(WireError::ConnectionClosed).is_channel_closed());
    }
}
