//! Transport bindings.
//!
//! A binding owns byte-level I/O and turns it into [`crate::Connection`]s that the
//! [`crate::Dispatcher`] drives. Two bindings exist:
//! - [`stream::StreamBinding`]: one persistent duplex byte stream (stdio), one client
//! - [`http::NetworkBinding`]: an HTTP server upgrading to WebSocket, many clients

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::error::TransportError;

pub mod cors;
pub mod http;
pub mod stream;
pub mod websocket;

pub use cors::CorsPolicy;
pub use http::{NetworkBinding, WebServerConfig};
pub use stream::StreamBinding;

/// Receiving half of a connection: yields one frame payload at a time.
#[async_trait]
pub trait MessageReader: Send {
    /// Next frame payload, `Ok(None)` at a clean end of stream.
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Sending half of a connection. Callers serialize access; see [`crate::Connection`].
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// A source of connections feeding one shared dispatcher.
#[async_trait]
pub trait TransportBinding: Send {
    /// Short name used in logs
    fn kind(&self) -> &'static str;

    /// Serve until the input ends (stream mode) or `shutdown` fires.
    async fn serve(
        self: Box<Self>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError>;
}

/// Transport selection, resolved by the process configuration.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Content-Length framed stdio; `input` replaces stdin with a file when set
    Stream { input: Option<PathBuf> },
    /// HTTP + WebSocket server
    Network(WebServerConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Stream { input: None }
    }
}

/// Build the binding described by `config`.
///
/// The network binding binds its listener here, so a port conflict surfaces before
/// the host reports itself as serving.
pub async fn from_config(
    config: TransportConfig,
) -> Result<Box<dyn TransportBinding>, TransportError> {
    match config {
        TransportConfig::Stream { input: None } => Ok(Box::new(StreamBinding::stdio())),
        TransportConfig::Stream { input: Some(path) } => {
            let file = tokio::fs::File::open(&path).await?;
            tracing::info!("Reading protocol input from {}", path.display());
            Ok(Box::new(StreamBinding::new(file, tokio::io::stdout())))
        }
        TransportConfig::Network(config) => Ok(Box::new(NetworkBinding::bind(config).await?)),
    }
}
