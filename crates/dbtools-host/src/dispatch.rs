//! Per-connection dispatch loop.
//!
//! Frames are read and dispatched in arrival order; every handler runs on its own
//! task so a long-running handler never stalls the reader. Completion order is
//! free: replies are correlated by id only.

use std::any::Any;
use std::sync::Arc;

use tracing::{Instrument, debug, error, info, info_span, warn};

use dbtools_json_rpc::{
    DecodeError, ErrorObject, Frame, JsonRpcError, JsonRpcNotification, JsonRpcRequest, decode,
};

use crate::connection::Connection;
use crate::context::{NotificationContext, RawRequestContext};
use crate::error::{HandlerError, TransportError};
use crate::registry::{MethodEntry, MethodRegistry};
use crate::transport::MessageReader;

/// Routes decoded frames to the handlers of a sealed [`MethodRegistry`].
///
/// Cheap to clone; every connection of a binding shares the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    log_frames: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<MethodRegistry>) -> Self {
        Self {
            registry,
            log_frames: false,
        }
    }

    /// Log every inbound frame at debug level.
    pub fn with_frame_logging(mut self, enabled: bool) -> Self {
        self.log_frames = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Read and dispatch frames until end of stream, a transport error, or the
    /// connection being closed from the write side. Always closes `connection`.
    pub async fn run_connection<R: MessageReader>(
        &self,
        connection: Arc<Connection>,
        mut reader: R,
    ) -> Result<(), TransportError> {
        info!(connection = %connection.id(), "Connection opened");
        let closed = connection.cancellation_token();

        let outcome = loop {
            tokio::select! {
                _ = closed.cancelled() => break Ok(()),
                read = reader.read_message() => match read {
                    Ok(Some(bytes)) => self.dispatch_bytes(&connection, &bytes).await,
                    Ok(None) => {
                        debug!(connection = %connection.id(), "End of input");
                        break Ok(());
                    }
                    Err(err) => break Err(err),
                },
            }
        };

        connection.close().await;
        match &outcome {
            Ok(()) => info!(connection = %connection.id(), "Connection closed"),
            Err(err) => warn!(connection = %connection.id(), "Connection closed by transport error: {}", err),
        }
        outcome
    }

    /// Decode one payload and dispatch it. Malformed frames never end the connection.
    pub async fn dispatch_bytes(&self, connection: &Arc<Connection>, bytes: &[u8]) {
        if self.log_frames {
            debug!(connection = %connection.id(), "<- {}", String::from_utf8_lossy(bytes));
        }
        match decode(bytes) {
            Ok(frame) => self.dispatch_frame(connection, frame).await,
            Err(err) => self.reject_malformed(connection, err).await,
        }
    }

    pub async fn dispatch_frame(&self, connection: &Arc<Connection>, frame: Frame) {
        match frame {
            Frame::Request(request) => self.dispatch_request(connection, request).await,
            Frame::Notification(notification) => self.dispatch_notification(connection, notification),
            reply => connection.resolve_reply(reply),
        }
    }

    async fn reject_malformed(&self, connection: &Arc<Connection>, err: DecodeError) {
        match err.to_response() {
            Some(response) => {
                warn!(connection = %connection.id(), "Malformed frame: {}", err);
                if let Err(write_err) = connection.write_frame(&Frame::Error(response)).await {
                    debug!("Protocol error reply not delivered: {}", write_err);
                }
            }
            None => warn!(connection = %connection.id(), "Dropping malformed frame without id: {}", err),
        }
    }

    async fn dispatch_request(&self, connection: &Arc<Connection>, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        if !connection.begin_request(&id) {
            warn!(connection = %connection.id(), request_id = %id, "Duplicate request id in flight");
            let error = JsonRpcError::new(
                Some(id.clone()),
                ErrorObject::invalid_request(Some(format!("duplicate request id: {}", id))),
            );
            if let Err(err) = connection.write_frame(&Frame::Error(error)).await {
                debug!("Duplicate id reply not delivered: {}", err);
            }
            return;
        }

        let handler = match self.registry.lookup(&method).map(|r| &r.entry) {
            Some(MethodEntry::Request(handler)) => Arc::clone(handler),
            Some(MethodEntry::Notification(_)) => {
                let error = ErrorObject::invalid_request(Some(format!(
                    "method '{}' is a notification and takes no id",
                    method
                )));
                connection
                    .finish_request(&id, Frame::error(Some(id.clone()), error))
                    .await;
                return;
            }
            None => {
                debug!(connection = %connection.id(), %method, "Method not found");
                let error = JsonRpcError::method_not_found(id.clone(), &method);
                connection.finish_request(&id, Frame::Error(error)).await;
                return;
            }
        };

        let span = info_span!("request", connection = %connection.id(), %method, request_id = %id);
        let (ctx, slot, released) = RawRequestContext::new(Arc::clone(connection), id, &method);
        let task = tokio::spawn(async move { handler.call(ctx, params).await }.instrument(span.clone()));

        tokio::spawn(
            async move {
                let fallback = match task.await {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => {
                        warn!("Handler failed: {}", err);
                        Some(err.to_error_object())
                    }
                    Err(join_err) => {
                        let message = join_error_message(join_err);
                        error!("Handler panicked: {}", message);
                        Some(ErrorObject::handler_error(message, None))
                    }
                };

                // The context may live on in a task the handler detached; only once it
                // is gone is it certain that nobody else will answer.
                let _ = released.await;
                if !slot.is_completed() {
                    let error = fallback.unwrap_or_else(|| {
                        error!("Handler finished without replying");
                        ErrorObject::internal_error(Some(format!(
                            "handler for '{}' finished without replying",
                            method
                        )))
                    });
                    slot.complete_if_pending(error).await;
                }
            }
            .instrument(span),
        );
    }

    fn dispatch_notification(&self, connection: &Arc<Connection>, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        let handler = match self.registry.lookup(&method).map(|r| &r.entry) {
            Some(MethodEntry::Notification(handler)) => Arc::clone(handler),
            Some(MethodEntry::Request(_)) => {
                warn!(connection = %connection.id(), %method, "Request method sent as a notification, dropping");
                return;
            }
            None => {
                debug!(connection = %connection.id(), %method, "Dropping notification for unregistered method");
                return;
            }
        };

        let span = info_span!("notification", connection = %connection.id(), %method);
        let ctx = NotificationContext::new(Arc::clone(connection), &method);
        let task = tokio::spawn(
            async move { handler.call(ctx, params).await }.instrument(span.clone()),
        );
        tokio::spawn(
            async move {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!("Notification handler failed: {}", err),
                    Err(join_err) => error!("Notification handler panicked: {}", join_error_message(join_err)),
                }
            }
            .instrument(span),
        );
    }
}

/// Human-readable message for a failed handler task.
fn join_error_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "handler was cancelled".to_string();
    }
    panic_message(err.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<HandlerError>() {
        err.to_string()
    } else {
        "handler panicked".to_string()
    }
}
