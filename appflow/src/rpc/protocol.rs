//! JSON-RPC 2.0 framing.
//!
//! Messages are newline-delimited JSON objects. A message without an `id`
//! is a notification and never gets a response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC 2.0 version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Must be "2.0".
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request id; absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl Request {
    /// Creates a request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(id.into()),
        }
    }

    /// Returns true if no response is expected.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC request id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
    /// Null id, used when replying to a message whose id could not be read.
    Null,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<RequestId> for Value {
    fn from(id: RequestId) -> Self {
        match id {
            RequestId::Number(n) => Self::from(n),
            RequestId::String(s) => Self::String(s),
            RequestId::Null => Self::Null,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Must be "2.0".
    pub jsonrpc: String,
    /// Result, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// The id of the request being answered.
    pub id: RequestId,
}

impl Response {
    /// Creates a successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(id: RequestId, err: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(err.into()),
            id,
        }
    }
}

/// A server-to-client notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Must be "2.0".
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Parameters.
    pub params: Value,
}

impl Notification {
    /// Creates a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcError> for ErrorObject {
    fn from(err: RpcError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

/// Protocol-level failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    /// Invalid JSON was received.
    #[error("Parse error: {0}")]
    Parse(String),
    /// The JSON is not a valid request object.
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),
    /// The method does not exist.
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    /// The parameters are unusable.
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    /// Something went wrong on the server.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    /// Returns the JSON-RPC error code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
        }
    }
}

/// Parses one line into a request.
pub fn parse_request_str(text: &str) -> Result<Request, RpcError> {
    let value: Value = serde_json::from_str(text).map_err(|e| RpcError::Parse(e.to_string()))?;
    let request: Request =
        serde_json::from_value(value).map_err(|e| RpcError::InvalidRequest(e.to_string()))?;

    if request.jsonrpc != JSONRPC_VERSION {
        return Err(RpcError::InvalidRequest(format!(
            "expected jsonrpc version '{JSONRPC_VERSION}', got '{}'",
            request.jsonrpc
        )));
    }
    Ok(request)
}

/// Serializes a message as one line, without the trailing newline.
pub fn to_line<T: Serialize>(message: &T) -> Result<String, RpcError> {
    serde_json::to_string(message).map_err(|e| RpcError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_request() {
        let req = parse_request_str(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert_eq!(req.id, Some(RequestId::Number(1)));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_notification() {
        let req = parse_request_str(
            r#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":"a"}}"#,
        )
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = parse_request_str("{not json").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn test_wrong_shape_is_invalid_request() {
        let err = parse_request_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap_err();
        assert_eq!(err.code(), -32600);

        let err = parse_request_str(r#"{"jsonrpc":"1.0","method":"ping","id":1}"#).unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[test]
    fn test_error_response_shape() {
        let resp = Response::error(
            RequestId::from("x"),
            RpcError::MethodNotFound("tools/destroy".into()),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert_eq!(json["error"]["message"], "Method not found: tools/destroy");
        assert!(json.get("result").is_none());
    }
}
