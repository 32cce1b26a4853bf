use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Outbound command datagram. Immutable once built; the correlation id must
/// stay stable across retransmissions of the same logical request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl CommandEnvelope {
    /// Build an envelope; devices expect `{"id": 0}` when the operation has
    /// no parameters of its own.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: params.unwrap_or_else(|| json!({ "id": 0 })),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Failure detail a device attaches to a response in place of `result`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "error {code}: {message}"),
            (Some(code), None) => write!(f, "error {code}"),
            (None, Some(message)) => write!(f, "{message}"),
            (None, None) => write!(f, "unspecified device error"),
        }
    }
}

/// Inbound response datagram. Either `result` or `error` is present on a
/// well-formed reply; both absent means the device answered garbage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl ResponseEnvelope {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ErrorPayload {
                code: Some(code),
                message: Some(message.into()),
            }),
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Correlation id of an already-parsed datagram, if it carries one.
    pub fn peek_id(value: &Value) -> Option<&str> {
        value.get("id").and_then(Value::as_str)
    }
}
