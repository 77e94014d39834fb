//! Scenario tests for dbtools-host
//!
//! Drive the stream binding over in-memory pipes and the network binding over a
//! loopback socket, against a small registry of test methods.

pub mod stream_tests;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{NotificationContext, RequestContext};
use crate::dispatch::Dispatcher;
use crate::error::{HandlerError, TransportError};
use crate::registry::{MethodRegistry, MethodRegistryBuilder};
use crate::transport::stream::{ContentLengthReader, ContentLengthWriter};
use crate::transport::{MessageReader, MessageWriter, StreamBinding, TransportBinding};

pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct SlowParams {
    pub ms: u64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub(crate) struct LogParams {
    pub msg: String,
}

/// Messages recorded by the `log` notification handler
pub(crate) type LogSink = Arc<Mutex<Vec<String>>>;

/// Registry with one method per behavior under test.
pub(crate) fn test_registry(log: LogSink) -> MethodRegistry {
    let mut builder = MethodRegistryBuilder::new();

    builder
        .request("ping", |ctx: RequestContext<Value>, _params: Value| async move {
            ctx.send_response(json!({"ok": true})).await;
            Ok(())
        })
        .unwrap();

    builder
        .request("boom", |_ctx: RequestContext<Value>, _params: Value| async move {
            panic!("boom")
        })
        .unwrap();

    builder
        .request("fail", |_ctx: RequestContext<Value>, _params: Value| async move {
            Err(HandlerError::failed("no luck").with_data(json!({"code": 7})))
        })
        .unwrap();

    builder
        .request("silent", |_ctx: RequestContext<Value>, _params: Value| async move {
            Ok(())
        })
        .unwrap();

    builder
        .request("slow", |ctx: RequestContext<Value>, params: SlowParams| async move {
            tokio::time::sleep(Duration::from_millis(params.ms)).await;
            ctx.send_response(json!({"slept": params.ms})).await;
            Ok(())
        })
        .unwrap();

    builder
        .request("detached", |ctx: RequestContext<Value>, _params: Value| async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.send_response(json!("late")).await;
            });
            Ok(())
        })
        .unwrap();

    builder
        .request("ask", |ctx: RequestContext<Value>, _params: Value| async move {
            let answer = ctx.send_request("client/question", json!({"q": "name?"})).await?;
            ctx.send_response(json!({"answer": answer})).await;
            Ok(())
        })
        .unwrap();

    builder
        .notification("log", move |_ctx: NotificationContext, params: LogParams| {
            let log = log.clone();
            async move {
                tracing::info!("client says {}", params.msg);
                if let Ok(mut messages) = log.lock() {
                    messages.push(params.msg);
                }
                Ok(())
            }
        })
        .unwrap();

    builder
        .notification("explode", |_ctx: NotificationContext, _params: Value| async move {
            panic!("notification handler exploded")
        })
        .unwrap();

    builder.seal()
}

/// Client end of a stream binding running over in-memory pipes.
pub(crate) struct StreamClient {
    writer: Option<ContentLengthWriter<DuplexStream>>,
    reader: ContentLengthReader<DuplexStream>,
    pub shutdown: CancellationToken,
    pub server: JoinHandle<Result<(), TransportError>>,
}

impl StreamClient {
    pub fn start(registry: Arc<MethodRegistry>) -> Self {
        // One pipe per direction, so dropping the client's writer is a clean EOF for the server
        let (client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (server_write, client_read) = tokio::io::duplex(64 * 1024);

        let shutdown = CancellationToken::new();
        let binding = Box::new(StreamBinding::new(server_read, server_write));
        let dispatcher = Dispatcher::new(registry);
        let server = tokio::spawn(binding.serve(dispatcher, shutdown.clone()));

        Self {
            writer: Some(ContentLengthWriter::new(client_write)),
            reader: ContentLengthReader::new(client_read),
            shutdown,
            server,
        }
    }

    pub async fn send(&mut self, frame: Value) {
        let payload = serde_json::to_vec(&frame).unwrap();
        self.send_bytes(&payload).await;
    }

    /// Send a correctly framed but arbitrary payload.
    pub async fn send_bytes(&mut self, payload: &[u8]) {
        self.writer
            .as_mut()
            .expect("client writer already closed")
            .write_message(payload)
            .await
            .unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        let payload = tokio::time::timeout(REPLY_TIMEOUT, self.reader.read_message())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_slice(&payload).unwrap()
    }

    /// Assert nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(frame) = tokio::time::timeout(window, self.reader.read_message()).await {
            panic!("expected no frame, got {:?}", frame);
        }
    }

    /// Close the client's output (EOF for the server) and wait for the server to stop.
    pub async fn finish(mut self) -> Result<(), TransportError> {
        self.writer.take();
        tokio::time::timeout(REPLY_TIMEOUT, self.server)
            .await
            .expect("server did not stop")
            .unwrap()
    }
}
