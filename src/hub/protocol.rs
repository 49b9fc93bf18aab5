//! JSON-RPC 2.0 messages carried by the framed transport.
//!
//! Calls are requests with positional `params`. The hub answers with a
//! response carrying the same `id`, and pushes notifications (no `id`) such
//! as `Ready` whenever it likes.

use serde::{Deserialize, Deserializer, Serialize};

use super::transport::RemoteError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Notification the hub pushes when it is ready to be queried.
pub const READY_NOTIFICATION: &str = "Ready";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Vec<serde_json::Value>,
    pub id: u64,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(method: &'a str, params: Vec<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id,
        }
    }
}

/// `Some(Null)` for an explicit `null`, so it stays distinct from a missing field.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Any JSON value; the hub may echo ids as numbers or strings.
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The request id this response answers, if it names one of ours.
    pub fn request_id(&self) -> Option<u64> {
        match &self.id {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The id exactly as received, for logging.
    pub fn raw_id(&self) -> String {
        self.id.to_string()
    }

    /// Collapse into the call outcome. A `null` result is a valid success.
    pub fn into_outcome(self) -> Result<serde_json::Value, RemoteError> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        self.result
            .ok_or_else(|| RemoteError::new("Response missing both result and error"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl From<JsonRpcError> for RemoteError {
    fn from(err: JsonRpcError) -> Self {
        RemoteError {
            code: Some(err.code),
            message: err.message,
            data: err.data,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl JsonRpcNotification {
    /// First positional argument, or the params object itself.
    pub fn payload(&self) -> &serde_json::Value {
        match &self.params {
            serde_json::Value::Array(items) => items.first().unwrap_or(&serde_json::Value::Null),
            other => other,
        }
    }
}

/// Anything the hub can send.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Classify a message body: anything with a `method` is a notification.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        if value.get("method").is_some() {
            serde_json::from_value(value).map(IncomingMessage::Notification)
        } else {
            serde_json::from_value(value).map(IncomingMessage::Response)
        }
    }
}
