//! Frame classification and the byte-level codec.
//!
//! A frame is exactly one of request, notification, response or error response.
//! The kind is decided purely from which members are present:
//!
//! | `method` | `id` | `result` / `error` | Frame |
//! |----------|------|--------------------|-------|
//! | yes      | yes  | no                 | request |
//! | yes      | no   | no                 | notification |
//! | no       | yes  | `result`           | response |
//! | no       | any  | `error`            | error response |
//!
//! Everything else is malformed.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{DecodeError, ErrorObject};
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::{JsonRpcError, JsonRpcResponse};
use crate::types::{JsonRpcVersion, RequestId};

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl Frame {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Frame::Request(JsonRpcRequest::new(id.into(), method, params))
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Frame::Notification(JsonRpcNotification::new(method, params))
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Frame::Response(JsonRpcResponse::new(id, result))
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Frame::Error(JsonRpcError::new(id, error))
    }

    /// The frame's id, if it carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Frame::Request(request) => Some(&request.id),
            Frame::Notification(_) => None,
            Frame::Response(response) => Some(&response.id),
            Frame::Error(error) => error.id.as_ref(),
        }
    }

    /// The method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Frame::Request(request) => Some(&request.method),
            Frame::Notification(notification) => Some(&notification.method),
            Frame::Response(_) | Frame::Error(_) => None,
        }
    }

    /// Whether this frame answers an earlier request.
    pub fn is_reply(&self) -> bool {
        matches!(self, Frame::Response(_) | Frame::Error(_))
    }
}

impl From<JsonRpcResponse> for Frame {
    fn from(response: JsonRpcResponse) -> Self {
        Frame::Response(response)
    }
}

impl From<JsonRpcError> for Frame {
    fn from(error: JsonRpcError) -> Self {
        Frame::Error(error)
    }
}

/// Serialize a frame to its JSON bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(frame)
}

/// Decode one frame from its JSON bytes.
///
/// Never panics; every failure is a [`DecodeError`] carrying the request id when it
/// could be recovered from an otherwise invalid object.
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::parse(e.to_string()))?;
    decode_value(value)
}

/// Decode one frame from an already parsed JSON value.
pub fn decode_value(value: Value) -> Result<Frame, DecodeError> {
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::invalid(None, "frame must be a JSON object"));
    };

    let raw_id = obj.remove("id");
    let id = raw_id.as_ref().and_then(RequestId::from_value);
    let id_is_invalid = matches!(&raw_id, Some(v) if !v.is_null() && id.is_none());

    check_version(&obj, id.as_ref())?;

    let params = obj.remove("params");
    let result = obj.remove("result");
    let error = obj.remove("error");

    match obj.remove("method") {
        Some(Value::String(method)) => {
            if result.is_some() || error.is_some() {
                return Err(DecodeError::invalid(
                    id,
                    "frame carries both a method and a result/error",
                ));
            }
            match (raw_id, id) {
                (None, _) => Ok(Frame::Notification(JsonRpcNotification::new(method, params))),
                (Some(_), Some(id)) => Ok(Frame::Request(JsonRpcRequest::new(id, method, params))),
                (Some(_), None) => Err(DecodeError::invalid(
                    None,
                    "request id must be a string or a number",
                )),
            }
        }
        Some(_) => Err(DecodeError::invalid(id, "method must be a string")),
        None => decode_reply(id, id_is_invalid, result, error),
    }
}

fn decode_reply(
    id: Option<RequestId>,
    id_is_invalid: bool,
    result: Option<Value>,
    error: Option<Value>,
) -> Result<Frame, DecodeError> {
    if id_is_invalid {
        return Err(DecodeError::invalid(
            None,
            "response id must be a string or a number",
        ));
    }
    match (result, error) {
        (Some(_), Some(_)) => Err(DecodeError::invalid(
            id,
            "response carries both a result and an error",
        )),
        (Some(result), None) => match id {
            Some(id) => Ok(Frame::Response(JsonRpcResponse::new(id, result))),
            None => Err(DecodeError::invalid(None, "response without an id")),
        },
        (None, Some(error)) => {
            let error: ErrorObject = serde_json::from_value(error)
                .map_err(|e| DecodeError::invalid(id.clone(), format!("invalid error object: {}", e)))?;
            Ok(Frame::Error(JsonRpcError::new(id, error)))
        }
        (None, None) => Err(DecodeError::invalid(
            id,
            "frame has neither a method nor a result/error",
        )),
    }
}

fn check_version(obj: &Map<String, Value>, id: Option<&RequestId>) -> Result<(), DecodeError> {
    // Absent `jsonrpc` is tolerated; a present one must say 2.0.
    match obj.get("jsonrpc") {
        None => Ok(()),
        Some(Value::String(v)) if v == JsonRpcVersion::V2_0.as_str() => Ok(()),
        Some(other) => Err(DecodeError::invalid(
            id.cloned(),
            format!("unsupported jsonrpc version: {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeErrorKind;
    use serde_json::json;

    fn decode_json(value: Value) -> Result<Frame, DecodeError> {
        decode(&serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_decode_request() {
        let frame = decode_json(json!({"method": "ping", "id": 1, "params": {}})).unwrap();
        match frame {
            Frame::Request(request) => {
                assert_eq!(request.id, RequestId::Number(1));
                assert_eq!(request.method, "ping");
                assert_eq!(request.params, Some(json!({})));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_id_beyond_i64_is_kept_verbatim() {
        let frame = decode(br#"{"method":"ping","id":18446744073709551615,"params":{}}"#).unwrap();
        let Frame::Request(request) = frame else {
            panic!("expected request");
        };
        let reply = encode(&Frame::response(request.id, json!(true))).unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["id"], json!(u64::MAX));
    }

    #[test]
    fn test_decode_notification() {
        let frame = decode_json(json!({"jsonrpc": "2.0", "method": "log", "params": {"msg": "hi"}})).unwrap();
        assert!(matches!(frame, Frame::Notification(ref n) if n.method == "log"));
        assert!(frame.id().is_none());
    }

    #[test]
    fn test_decode_response_and_error() {
        let frame = decode_json(json!({"id": "a", "result": null})).unwrap();
        assert!(matches!(frame, Frame::Response(ref r) if r.id == RequestId::from("a")));

        let frame = decode_json(json!({"id": 4, "error": {"code": -32000, "message": "nope"}})).unwrap();
        match frame {
            Frame::Error(error) => {
                assert_eq!(error.id, Some(RequestId::Number(4)));
                assert_eq!(error.error.message, "nope");
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_id_without_method_or_result_is_malformed_with_id() {
        let err = decode_json(json!({"id": 9})).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidRequest);
        assert_eq!(err.id(), Some(&RequestId::Number(9)));
    }

    #[test]
    fn test_parse_error_has_no_id() {
        let err = decode(b"{\"method\": \"ping\", \"id\": 1").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::Parse);
        assert!(err.id().is_none());
    }

    #[test]
    fn test_non_string_method_recovers_id() {
        let err = decode_json(json!({"method": 42, "id": "r1"})).unwrap_err();
        assert_eq!(err.id(), Some(&RequestId::from("r1")));
    }

    #[test]
    fn test_bad_version_recovers_id() {
        let err = decode_json(json!({"jsonrpc": "1.0", "method": "ping", "id": 3})).unwrap_err();
        assert_eq!(err.id(), Some(&RequestId::Number(3)));
    }

    #[test]
    fn test_null_id_request_is_rejected_without_id() {
        let err = decode_json(json!({"method": "ping", "id": null})).unwrap_err();
        assert!(err.id().is_none());
    }

    #[test]
    fn test_method_with_result_is_malformed() {
        let err = decode_json(json!({"method": "ping", "id": 1, "result": 1})).unwrap_err();
        assert_eq!(err.id(), Some(&RequestId::Number(1)));
    }

    #[test]
    fn test_non_object_is_malformed() {
        let err = decode_json(json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidRequest);
        assert!(err.id().is_none());
    }

    #[test]
    fn test_encode_response_matches_wire_shape() {
        let frame = Frame::response(RequestId::Number(1), json!({"ok": true}));
        let bytes = encode(&frame).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}}));
    }

    #[test]
    fn test_encode_then_decode_notification() {
        let frame = Frame::notification("connection/complete", Some(json!({"ownerUri": "u"})));
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }
}
