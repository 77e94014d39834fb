use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;

/// Identifier correlating a request with its response.
///
/// JSON-RPC allows numbers and strings; both are carried back to the client verbatim.
/// Numbers outside the `i64` range, and fractional ones, are kept as
/// [`RequestId::Opaque`] so they still round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Opaque(Number),
}

impl RequestId {
    /// Interpret a raw JSON value as a request id.
    ///
    /// Returns `None` for `null` and non-scalar values.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(
                n.as_i64()
                    .map(RequestId::Number)
                    .unwrap_or_else(|| RequestId::Opaque(n.clone())),
            ),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Opaque(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

/// The `jsonrpc` member. Only 2.0 exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonRpcVersion {
    #[default]
    V2_0,
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonRpcVersion::V2_0 => crate::JSONRPC_VERSION,
        }
    }
}

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == crate::JSONRPC_VERSION {
            Ok(JsonRpcVersion::V2_0)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported JSON-RPC version: {}",
                version
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_from_value() {
        assert_eq!(RequestId::from_value(&json!(7)), Some(RequestId::Number(7)));
        assert_eq!(
            RequestId::from_value(&json!("abc")),
            Some(RequestId::String("abc".to_string()))
        );
        assert_eq!(RequestId::from_value(&json!(null)), None);
        assert_eq!(
            RequestId::from_value(&json!(1.5)),
            Some(RequestId::Opaque(Number::from_f64(1.5).unwrap()))
        );
        assert_eq!(RequestId::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_request_id_serializes_verbatim() {
        assert_eq!(serde_json::to_string(&RequestId::Number(5)).unwrap(), "5");
        assert_eq!(
            serde_json::to_string(&RequestId::from("req-1")).unwrap(),
            "\"req-1\""
        );
    }

    #[test]
    fn test_wide_numeric_id_round_trips() {
        let id = RequestId::from_value(&json!(u64::MAX)).unwrap();
        assert!(matches!(id, RequestId::Opaque(_)));
        assert_eq!(serde_json::to_string(&id).unwrap(), "18446744073709551615");

        let parsed: RequestId = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_version_rejects_unknown() {
        let parsed: Result<JsonRpcVersion, _> = serde_json::from_value(json!("1.0"));
        assert!(parsed.is_err());
        let parsed: JsonRpcVersion = serde_json::from_value(json!("2.0")).unwrap();
        assert_eq!(parsed, JsonRpcVersion::V2_0);
    }
}
