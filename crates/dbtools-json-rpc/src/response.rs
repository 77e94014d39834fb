use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ErrorObject;
use crate::types::{JsonRpcVersion, RequestId};

/// A successful JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            result,
        }
    }

    pub fn null(id: RequestId) -> Self {
        Self::new(id, Value::Null)
    }
}

impl<T> From<(RequestId, T)> for JsonRpcResponse
where
    T: Into<Value>,
{
    fn from((id, result): (RequestId, T)) -> Self {
        Self::new(id, result.into())
    }
}

/// JSON-RPC Error response
///
/// `id` is `None` only when the failing frame's id could not be recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

impl JsonRpcError {
    pub fn new(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            error,
        }
    }

    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(Some(id), ErrorObject::method_not_found(method))
    }

    pub fn invalid_params(id: RequestId, message: &str) -> Self {
        Self::new(Some(id), ErrorObject::invalid_params(message))
    }

    pub fn internal_error(id: Option<RequestId>, message: Option<String>) -> Self {
        Self::new(id, ErrorObject::internal_error(message))
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JSON-RPC Error {}: {}",
            self.error.code, self.error.message
        )
    }
}

impl std::error::Error for JsonRpcError {}
