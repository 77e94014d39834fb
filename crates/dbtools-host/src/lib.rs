//! # Database Tools Protocol Host
//!
//! Hosts a fixed set of services behind one JSON-RPC 2.0 dispatch table and
//! serves it over one of two transports:
//! - a Content-Length framed duplex stream (stdio), one client
//! - an HTTP server upgrading to WebSocket, many concurrent clients
//!
//! ## Features
//! - Two-phase service startup (`register`, then `initialize`) before anything is served
//! - Typed method registration with JSON Schema descriptors
//! - Exactly-once replies per request, with handler faults and panics turned
//!   into error replies instead of taking the connection down
//! - Server-to-client notifications and requests
//! - CORS and keep-alive options for the network transport

pub mod connection;
pub mod context;
pub mod dispatch;
pub mod docs;
pub mod error;
pub mod host;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod tests;

// Re-export main types
pub use connection::{Connection, ConnectionOptions};
pub use context::{NotificationContext, RawRequestContext, RequestContext};
pub use dispatch::Dispatcher;
pub use docs::render_markdown;
pub use error::{
    HandlerError, OutboundRequestError, ProviderError, RegistrationError, StartupError,
    TransportError,
};
pub use host::{Host, HostBuilder};
pub use provider::{Registrar, Service, ServiceProvider, ServiceState};
pub use registry::{
    MethodDescriptor, MethodKind, MethodRegistry, MethodRegistryBuilder, NotificationHandler,
    RequestHandler,
};
pub use retry::RetryPolicy;
pub use transport::{
    CorsPolicy, MessageReader, MessageWriter, NetworkBinding, StreamBinding, TransportBinding,
    TransportConfig, WebServerConfig,
};

// Re-export the codec
pub use dbtools_json_rpc::{self as json_rpc, ErrorObject, Frame, RequestId};

/// Result type for host operations
pub type Result<T> = std::result::Result<T, StartupError>;
