//! # JSON-RPC 2.0 Frame Codec
//!
//! A pure, transport-agnostic codec for the JSON-RPC 2.0 frames exchanged between
//! the database tools service and its client editor. This crate knows nothing about
//! sockets, streams or handlers: it turns bytes into [`Frame`]s and back.
//!
//! ## Features
//! - Classification of request / notification / response / error frames purely from
//!   the presence of `method`, `id`, `result` and `error`
//! - Best-effort request id recovery on malformed frames, so a protocol-error
//!   reply can still be correlated
//! - Standard JSON-RPC 2.0 error codes and error objects

pub mod error;
pub mod frame;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

pub mod prelude;

// Re-export main types
pub use error::{DecodeError, DecodeErrorKind, ErrorObject, JsonRpcErrorCode};
pub use frame::{Frame, decode, decode_value, encode};
pub use notification::JsonRpcNotification;
pub use request::JsonRpcRequest;
pub use response::{JsonRpcError, JsonRpcResponse};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}
