//! rackrpc Response Types
//!
//! This module defines the RPC response structure.

use serde::{Deserialize, Serialize};
use super::error::{Result, RpcError};
use super::RequestId;

/// RPC method result (JSON value)
pub type RpcResult = serde_json::Value;

/// An RPC response, sent by whichever end handled the matching request.
///
/// # Fields
///
/// - `id`: The request ID this response corresponds to
/// - `result`: The result value (present on success)
/// - `error`: Error message (present on failure)
/// - `error_kind`: Optional error type name, e.g. `CannotRegisterRackController`
/// - `success`: Whether the request succeeded
///
/// # Example
///
/// ```
/// use rackrpc_common::protocol::responses::Response;
/// use serde_json::json;
///
/// let success = Response::success(123, json!({"ident": "region:pid=4242"}));
/// let error = Response::error(123, "no such event-loop");
/// let rejected = Response::error_with_kind(123, "CannotRegisterRackController", "nope");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    /// Request identifier this response corresponds to
    pub id: RequestId,
    /// Result value (present on success)
    pub result: Option<RpcResult>,
    /// Error message (present on failure)
    pub error: Option<String>,
    /// Error type name reported by the remote handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Whether the request succeeded
    pub success: bool,
}

impl Response {
    /// Creates a successful response.
    ///
    /// ```
    /// use rackrpc_common::protocol::responses::Response;
    /// use serde_json::json;
    ///
    /// let response = Response::success(123, json!({"ok": true}));
    /// assert!(response.success);
    /// assert_eq!(response.result, Some(json!({"ok": true})));
    /// ```
    pub fn success(id: RequestId, result: RpcResult) -> Self {
        Response {
            id,
            result: Some(result),
            error: None,
            error_kind: None,
            success: true,
        }
    }

    /// Creates an error response.
    ///
    /// ```
    /// use rackrpc_common::protocol::responses::Response;
    ///
    /// let response = Response::error(123, "Division by zero");
    /// assert!(!response.success);
    /// assert_eq!(response.error, Some("Division by zero".to_string()));
    /// ```
    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Response {
            id,
            result: None,
            error: Some(error.into()),
            error_kind: None,
            success: false,
        }
    }

    /// Creates an error response tagged with an error type name.
    pub fn error_with_kind(id: RequestId, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Response {
            error_kind: Some(kind.into()),
            ..Self::error(id, error)
        }
    }

    /// Builds the response for `id` from a handler outcome.
    pub fn from_result(id: RequestId, outcome: Result<RpcResult>) -> Self {
        match outcome {
            Ok(value) => Self::success(id, value),
            Err(RpcError::Remote { kind: Some(kind), message }) => {
                Self::error_with_kind(id, kind, message)
            }
            Err(err) => Self::error(id, err.to_string()),
        }
    }

    /// Converts the response into the caller-facing result.
    pub fn into_result(self) -> Result<RpcResult> {
        if self.success {
            self.result.ok_or_else(|| {
                RpcError::InvalidResponse("Missing result in success response".to_string())
            })
        } else {
            Err(RpcError::Remote {
                kind: self.error_kind,
                message: self.error.unwrap_or_else(|| "Unknown error".to_string()),
            })
        }
    }
}
