//! # JSON-RPC Codec Prelude
//!
//! Convenient re-exports of the most commonly used codec types.
//!
//! ```rust
//! use dbtools_json_rpc::prelude::*;
//! ```

pub use crate::error::{DecodeError, DecodeErrorKind, ErrorObject, JsonRpcErrorCode};
pub use crate::frame::{Frame, decode, encode};
pub use crate::notification::JsonRpcNotification;
pub use crate::request::JsonRpcRequest;
pub use crate::response::{JsonRpcError, JsonRpcResponse};
pub use crate::types::{JsonRpcVersion, RequestId};

pub use crate::error_codes::*;
