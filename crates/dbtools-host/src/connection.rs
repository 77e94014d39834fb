//! One active transport session.
//!
//! A connection serializes its outbound writes, tracks the ids of incoming
//! requests still awaiting a reply, and correlates replies to server-initiated
//! requests. Its lifetime bounds every context issued on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use dbtools_json_rpc::{ErrorObject, Frame, RequestId, encode};

use crate::error::{OutboundRequestError, TransportError};
use crate::transport::MessageWriter;

type PendingReply = oneshot::Sender<Result<Value, ErrorObject>>;

/// Per-connection options decided by the transport binding.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Close the connection after its first reply frame (keep-alive disabled)
    pub close_after_reply: bool,
    /// Log every outbound frame at debug level
    pub log_frames: bool,
    /// Origin that opened the connection, if the transport knows it
    pub origin: Option<String>,
    /// The client has no way to answer server-initiated requests (one-shot HTTP)
    pub one_way: bool,
}

/// One transport session shared by the read loop and every in-flight handler.
pub struct Connection {
    id: String,
    options: ConnectionOptions,
    writer: Mutex<Box<dyn MessageWriter>>,
    closed: CancellationToken,
    in_flight: std::sync::Mutex<HashSet<RequestId>>,
    outgoing: std::sync::Mutex<HashMap<RequestId, PendingReply>>,
    next_outgoing_id: AtomicI64,
}

impl Connection {
    pub fn new(writer: impl MessageWriter + 'static) -> Arc<Self> {
        Self::with_options(writer, ConnectionOptions::default())
    }

    pub fn with_options(writer: impl MessageWriter + 'static, options: ConnectionOptions) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::now_v7().to_string(),
            options,
            writer: Mutex::new(Box::new(writer)),
            closed: CancellationToken::new(),
            in_flight: std::sync::Mutex::new(HashSet::new()),
            outgoing: std::sync::Mutex::new(HashMap::new()),
            next_outgoing_id: AtomicI64::new(1),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> Option<&str> {
        self.options.origin.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when this connection closes. Handlers may watch it to abandon work.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Number of incoming requests still awaiting their reply.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|set| set.len()).unwrap_or(0)
    }

    /// Encode and write one frame. Writes are serialized; a closed connection
    /// yields [`TransportError::Closed`] without touching the transport.
    pub async fn write_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let bytes = encode(frame)?;
        if self.options.log_frames {
            debug!(
                connection = %self.id,
                "-> {}",
                String::from_utf8_lossy(&bytes)
            );
        }

        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Err(err) = writer.write_message(&bytes).await {
            drop(writer);
            warn!(connection = %self.id, "Write failed, closing connection: {}", err);
            self.close().await;
            return Err(err);
        }
        Ok(())
    }

    /// Fire-and-forget server-to-client notification.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        self.write_frame(&Frame::notification(method, params)).await
    }

    /// Send a server-to-client request and wait for the client's reply.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, OutboundRequestError> {
        if self.options.one_way {
            return Err(TransportError::RepliesUnsupported.into());
        }
        let id = RequestId::Number(self.next_outgoing_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut outgoing = self
                .outgoing
                .lock()
                .map_err(|_| OutboundRequestError::Disconnected)?;
            outgoing.insert(id.clone(), tx);
        }

        if let Err(err) = self
            .write_frame(&Frame::request(id.clone(), method, params))
            .await
        {
            if let Ok(mut outgoing) = self.outgoing.lock() {
                outgoing.remove(&id);
            }
            return Err(err.into());
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(OutboundRequestError::Rejected(error)),
            Err(_) => Err(OutboundRequestError::Disconnected),
        }
    }

    /// Record an incoming request id. Returns `false` if the id is already in flight.
    pub(crate) fn begin_request(&self, id: &RequestId) -> bool {
        match self.in_flight.lock() {
            Ok(mut set) => set.insert(id.clone()),
            Err(_) => false,
        }
    }

    /// Write the terminal reply for an in-flight request and release its id.
    pub(crate) async fn finish_request(&self, id: &RequestId, reply: Frame) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(id);
        }
        match self.write_frame(&reply).await {
            Ok(()) => {
                if self.options.close_after_reply {
                    debug!(connection = %self.id, "Keep-alive disabled, closing after reply");
                    self.close().await;
                }
            }
            Err(TransportError::Closed) => {
                debug!(connection = %self.id, request_id = %id, "Reply discarded, connection already closed");
            }
            Err(err) => {
                debug!(connection = %self.id, request_id = %id, "Reply not delivered: {}", err);
            }
        }
    }

    /// Route a client reply to the server-initiated request awaiting it.
    pub(crate) fn resolve_reply(&self, frame: Frame) {
        let (id, outcome) = match frame {
            Frame::Response(response) => (Some(response.id), Ok(response.result)),
            Frame::Error(error) => (error.id, Err(error.error)),
            other => {
                trace!("Ignoring non-reply frame in resolve_reply: {:?}", other.method());
                return;
            }
        };
        let Some(id) = id else {
            warn!(connection = %self.id, "Client reported an error without an id");
            return;
        };
        let waiter = self
            .outgoing
            .lock()
            .ok()
            .and_then(|mut outgoing| outgoing.remove(&id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => warn!(
                connection = %self.id,
                response_id = %id,
                "Dropping response for unknown request id"
            ),
        }
    }

    /// Close the connection: cancel its token, forget pending bookkeeping and
    /// shut the transport down. Idempotent.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        if let Ok(mut set) = self.in_flight.lock() {
            set.clear();
        }
        if let Ok(mut outgoing) = self.outgoing.lock() {
            // Dropping the senders resolves every waiter with `Disconnected`.
            outgoing.clear();
        }
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.close().await {
            debug!(connection = %self.id, "Error while closing transport: {}", err);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
