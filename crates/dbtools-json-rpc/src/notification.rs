use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::JsonRpcVersion;

/// A JSON-RPC notification (request without an id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }

    /// Create a new notification with no parameters
    pub fn new_no_params(method: impl Into<String>) -> Self {
        Self::new(method, None)
    }
}
