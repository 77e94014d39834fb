use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::response::JsonRpcError;
use crate::types::RequestId;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError(i64), // -32099 to -32000
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => crate::error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => crate::error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => crate::error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => crate::error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => crate::error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// JSON-RPC Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: JsonRpcErrorCode, message: Option<String>, data: Option<Value>) -> Self {
        Self {
            code: code.code(),
            message: message.unwrap_or_else(|| code.message().to_string()),
            data,
        }
    }

    pub fn parse_error(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::ParseError, message, None)
    }

    pub fn invalid_request(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, message, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound,
            Some(format!("method not found: {}", method)),
            None,
        )
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::InvalidParams,
            Some(message.to_string()),
            None,
        )
    }

    pub fn internal_error(message: Option<String>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError, message, None)
    }

    /// A handler-reported failure. Services report plain messages; the code is the
    /// generic internal error unless they pick one from the server range.
    pub fn handler_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError, Some(message.into()), data)
    }

    pub fn server_error(code: i64, message: &str, data: Option<Value>) -> Self {
        assert!(
            (crate::error_codes::SERVER_ERROR_START..=crate::error_codes::SERVER_ERROR_END)
                .contains(&code),
            "Server error code must be in range -32099 to -32000"
        );
        Self::new(
            JsonRpcErrorCode::ServerError(code),
            Some(message.to_string()),
            data,
        )
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Why a byte buffer could not be decoded into a [`crate::Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Not valid JSON at all
    Parse,
    /// Valid JSON, but not a valid JSON-RPC frame shape
    InvalidRequest,
}

/// Decoding failure carrying the best-effort request id, if one could be recovered.
///
/// When `id` is present the caller is expected to answer with [`DecodeError::to_response`];
/// otherwise the frame is logged and dropped.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub id: Option<RequestId>,
    pub message: String,
}

impl DecodeError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::Parse,
            id: None,
            message: message.into(),
        }
    }

    pub fn invalid(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::InvalidRequest,
            id,
            message: message.into(),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn error_object(&self) -> ErrorObject {
        match self.kind {
            DecodeErrorKind::Parse => ErrorObject::parse_error(Some(self.message.clone())),
            DecodeErrorKind::InvalidRequest => {
                ErrorObject::invalid_request(Some(self.message.clone()))
            }
        }
    }

    /// Protocol-error response for this failure, when an id was recovered.
    pub fn to_response(&self) -> Option<JsonRpcError> {
        self.id
            .clone()
            .map(|id| JsonRpcError::new(Some(id), self.error_object()))
    }
}
