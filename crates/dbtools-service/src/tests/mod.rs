//! Service scenarios driven through the stream binding

pub mod service_tests;

use std::time::Duration;

use serde_json::Value;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dbtools_host::transport::stream::{ContentLengthReader, ContentLengthWriter};
use dbtools_host::{Host, MessageReader, MessageWriter, StreamBinding, TransportError};

pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Editor-side end of a host served over in-memory pipes.
pub(crate) struct EditorClient {
    writer: Option<ContentLengthWriter<DuplexStream>>,
    reader: ContentLengthReader<DuplexStream>,
    server: JoinHandle<Result<(), dbtools_host::StartupError>>,
    next_id: i64,
}

impl EditorClient {
    pub fn start(host: Host) -> Self {
        let (client_write, server_read) = tokio::io::duplex(64 * 1024);
        let (server_write, client_read) = tokio::io::duplex(64 * 1024);

        let binding = Box::new(StreamBinding::new(server_read, server_write));
        let server =
            tokio::spawn(async move { host.serve(binding, CancellationToken::new()).await });

        Self {
            writer: Some(ContentLengthWriter::new(client_write)),
            reader: ContentLengthReader::new(client_read),
            server,
            next_id: 1,
        }
    }

    async fn write(&mut self, frame: Value) {
        let payload = serde_json::to_vec(&frame).unwrap();
        self.writer
            .as_mut()
            .expect("client writer already closed")
            .write_message(&payload)
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

    /// Send a request and return its reply, skipping any notifications in between.
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.write(serde_json::json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        loop {
            let frame = self.recv().await;
            if frame["id"] == id {
                return frame;
            }
        }
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.write(serde_json::json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    pub async fn finish(mut self) -> Result<(), TransportError> {
        self.writer.take();
        let result = tokio::time::timeout(REPLY_TIMEOUT, self.server)
            .await
            .expect("server did not stop")
            .unwrap();
        match result {
            Ok(()) => Ok(()),
            Err(dbtools_host::StartupError::Transport(err)) => Err(err),
            Err(other) => panic!("unexpected host error: {}", other),
        }
    }
}
