//! Per-message handles passed to handlers.
//!
//! A [`RequestContext`] is the only way a handler answers a request. Its terminal
//! methods consume the context, so a second reply does not compile. The shared
//! [`ReplySlot`] additionally guarantees that the dispatcher's fallback reply (for
//! handlers that fail, panic or drop the context) never follows a real one.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use dbtools_json_rpc::{ErrorObject, Frame, RequestId};

use crate::connection::Connection;
use crate::error::{HandlerError, OutboundRequestError};

/// Exactly-once completion state of one incoming request.
pub(crate) struct ReplySlot {
    connection: Arc<Connection>,
    id: RequestId,
    method: String,
    completed: AtomicBool,
}

impl ReplySlot {
    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Terminal action taken through a context. A second completion is a bug in the host.
    async fn complete(&self, frame: Frame) {
        let first = !self.completed.swap(true, Ordering::AcqRel);
        debug_assert!(first, "request {} ({}) completed twice", self.id, self.method);
        if !first {
            error!(
                method = %self.method,
                request_id = %self.id,
                "Suppressing second reply for an already completed request"
            );
            return;
        }
        self.connection.finish_request(&self.id, frame).await;
    }

    /// Fallback reply from the dispatcher. No-op when the handler already answered.
    pub(crate) async fn complete_if_pending(&self, error: ErrorObject) -> bool {
        if self.completed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.connection
            .finish_request(&self.id, Frame::error(Some(self.id.clone()), error))
            .await;
        true
    }
}

/// Untyped core of a request context, handed to the registry's decoding adapter.
pub struct RawRequestContext {
    slot: Arc<ReplySlot>,
    // Dropped together with the context; the dispatcher awaits the paired receiver
    // to learn that nobody can answer any more.
    _release: oneshot::Sender<()>,
}

impl RawRequestContext {
    pub(crate) fn new(
        connection: Arc<Connection>,
        id: RequestId,
        method: &str,
    ) -> (Self, Arc<ReplySlot>, oneshot::Receiver<()>) {
        let slot = Arc::new(ReplySlot {
            connection,
            id,
            method: method.to_string(),
            completed: AtomicBool::new(false),
        });
        let (release, released) = oneshot::channel();
        (
            Self {
                slot: Arc::clone(&slot),
                _release: release,
            },
            slot,
            released,
        )
    }

    pub fn id(&self) -> &RequestId {
        &self.slot.id
    }

    pub fn method(&self) -> &str {
        &self.slot.method
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.slot.connection
    }

    pub async fn send_result_value(self, result: Value) {
        let frame = Frame::response(self.slot.id.clone(), result);
        self.slot.complete(frame).await;
    }

    pub async fn send_error_object(self, error: ErrorObject) {
        let frame = Frame::error(Some(self.slot.id.clone()), error);
        self.slot.complete(frame).await;
    }
}

/// Handle for answering one request whose result type is `R`.
pub struct RequestContext<R> {
    raw: RawRequestContext,
    _result: PhantomData<fn(R)>,
}

impl<R: Serialize> RequestContext<R> {
    pub(crate) fn new(raw: RawRequestContext) -> Self {
        Self {
            raw,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> &RequestId {
        self.raw.id()
    }

    pub fn method(&self) -> &str {
        self.raw.method()
    }

    pub fn connection_id(&self) -> &str {
        self.raw.connection().id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        self.raw.connection()
    }

    /// Cancelled when the connection this request arrived on goes away.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.raw.connection().cancellation_token()
    }

    /// Answer the request with `result`.
    pub async fn send_response(self, result: R) {
        match serde_json::to_value(&result) {
            Ok(value) => self.raw.send_result_value(value).await,
            Err(err) => {
                error!(method = %self.method(), "Failed to encode result: {}", err);
                self.raw
                    .send_error_object(ErrorObject::internal_error(Some(format!(
                        "failed to encode result: {}",
                        err
                    ))))
                    .await
            }
        }
    }

    /// Answer the request with an error carrying `message` and optional `data`.
    pub async fn send_error(self, message: impl Into<String>, data: Option<Value>) {
        self.raw
            .send_error_object(ErrorObject::handler_error(message, data))
            .await
    }

    pub async fn send_error_object(self, error: ErrorObject) {
        self.raw.send_error_object(error).await
    }

    /// Answer the request with a handler error.
    pub async fn fail(self, err: HandlerError) {
        self.raw.send_error_object(err.to_error_object()).await
    }

    /// Emit an unrelated server-to-client notification (progress, say). Fire-and-forget.
    pub async fn send_notification<T: Serialize>(&self, method: &str, params: T) {
        send_notification(self.raw.connection(), method, params).await
    }

    /// Ask the client something and wait for its answer.
    pub async fn send_request<T: Serialize>(
        &self,
        method: &str,
        params: T,
    ) -> Result<Value, OutboundRequestError> {
        let params = serde_json::to_value(params)
            .map_err(|e| OutboundRequestError::Transport(e.into()))?;
        self.raw.connection().send_request(method, Some(params)).await
    }
}

/// Handle passed to notification handlers. There is nothing to reply to.
#[derive(Clone)]
pub struct NotificationContext {
    connection: Arc<Connection>,
    method: String,
}

impl NotificationContext {
    pub(crate) fn new(connection: Arc<Connection>, method: &str) -> Self {
        Self {
            connection,
            method: method.to_string(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn connection_id(&self) -> &str {
        self.connection.id()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.connection.cancellation_token()
    }

    /// Emit a server-to-client notification. Fire-and-forget.
    pub async fn send_notification<T: Serialize>(&self, method: &str, params: T) {
        send_notification(&self.connection, method, params).await
    }
}

async fn send_notification<T: Serialize>(connection: &Connection, method: &str, params: T) {
    let params = match serde_json::to_value(params) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(err) => {
            warn!(method, "Failed to encode notification params: {}", err);
            return;
        }
    };
    if let Err(err) = connection.send_notification(method, params).await {
        debug!(connection = %connection.id(), method, "Notification not delivered: {}", err);
    }
}
