use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// A JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a new request with no parameters
    pub fn new_no_params(id: RequestId, method: impl Into<String>) -> Self {
        Self::new(id, method, None)
    }

    /// Get a parameter by name (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_string};

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new_no_params(RequestId::Number(1), "test_method");

        let json = to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_request_get_param() {
        let request = JsonRpcRequest::new(
            RequestId::from("req1"),
            "connection/connect",
            Some(json!({"ownerUri": "file:///a.sql"})),
        );

        assert_eq!(request.get_param("ownerUri"), Some(&json!("file:///a.sql")));
        assert_eq!(request.get_param("missing"), None);
    }
}
