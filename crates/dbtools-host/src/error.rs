//! Error taxonomy of the protocol host.
//!
//! Faults are contained at the smallest scope that can absorb them:
//! [`TransportError`] ends one connection, [`RegistrationError`] and
//! [`StartupError`] stop the host before it serves, and [`HandlerError`] becomes
//! an error reply for one request.

use serde_json::Value;
use thiserror::Error;

use dbtools_json_rpc::ErrorObject;

/// Byte-level failure on one connection. Terminates that connection only.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing Content-Length header")]
    MissingContentLength,

    #[error("invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("connection closed")]
    Closed,

    #[error("connection cannot carry replies to server requests")]
    RepliesUnsupported,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// Startup-time registration failure. The host never reaches the serving phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("method '{0}' is already registered")]
    DuplicateMethod(String),

    #[error("service '{0}' is already registered")]
    DuplicateService(String),
}

/// Peer lookup and initialization failures raised through the service provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("service '{0}' is not registered")]
    UnknownService(String),

    #[error("no service of type {0} is registered")]
    MissingService(&'static str),

    #[error("service '{service}' failed to initialize: {message}")]
    Initialization {
        service: &'static str,
        message: String,
    },
}

/// Anything that prevents the host from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("service '{service}' failed to initialize: {source}")]
    Initialize {
        service: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of a server-to-client request sent through [`crate::Connection::send_request`].
#[derive(Debug, Error)]
pub enum OutboundRequestError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("client returned an error: {0}")]
    Rejected(ErrorObject),

    #[error("connection closed before a reply arrived")]
    Disconnected,
}

/// A fault reported by a service handler.
///
/// `Transient` marks faults worth retrying (a severed downstream connection, say);
/// `Failed` is permanent. The host itself never retries: see [`crate::retry::RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    #[error("{message}")]
    Transient {
        message: String,
        data: Option<Value>,
    },

    #[error("{message}")]
    Failed {
        message: String,
        data: Option<Value>,
    },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
            data: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient {
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data sent alongside the message in the error reply.
    pub fn with_data(self, data: Value) -> Self {
        match self {
            HandlerError::Transient { message, .. } => HandlerError::Transient {
                message,
                data: Some(data),
            },
            HandlerError::Failed { message, .. } => HandlerError::Failed {
                message,
                data: Some(data),
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            HandlerError::Transient { message, .. } | HandlerError::Failed { message, .. } => {
                message
            }
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            HandlerError::Transient { data, .. } | HandlerError::Failed { data, .. } => {
                data.as_ref()
            }
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::handler_error(self.message(), self.data().cloned())
    }
}

impl From<ProviderError> for HandlerError {
    fn from(err: ProviderError) -> Self {
        HandlerError::failed(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::failed(err.to_string())
    }
}

impl From<OutboundRequestError> for HandlerError {
    fn from(err: OutboundRequestError) -> Self {
        match err {
            OutboundRequestError::Rejected(error) => HandlerError::Failed {
                message: error.message,
                data: error.data,
            },
            other => HandlerError::transient(other.to_string()),
        }
    }
}
