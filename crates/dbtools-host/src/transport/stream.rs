//! Content-Length framed duplex stream transport.
//!
//! Every frame is preceded by a header block:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"capabilities/list"}
//! ```
//!
//! Headers other than `Content-Length` are accepted and ignored.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{MessageReader, MessageWriter, TransportBinding};
use crate::connection::{Connection, ConnectionOptions};
use crate::dispatch::Dispatcher;
use crate::error::TransportError;

const CONTENT_LENGTH: &str = "content-length";

/// Largest accepted frame payload
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Longest accepted header line, terminator included
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Reads Content-Length framed payloads.
pub struct ContentLengthReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin + Send> ContentLengthReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Parse one header block. `Ok(None)` on a clean EOF before any header byte.
    async fn read_headers(&mut self) -> Result<Option<usize>, TransportError> {
        let mut content_length = None;
        let mut seen_header = false;

        loop {
            self.line.clear();
            let read = (&mut self.inner)
                .take(MAX_HEADER_LINE as u64)
                .read_line(&mut self.line)
                .await?;
            if read == MAX_HEADER_LINE && !self.line.ends_with('\n') {
                return Err(TransportError::InvalidHeader(format!(
                    "header line exceeds the {} byte limit",
                    MAX_HEADER_LINE
                )));
            }
            if read == 0 {
                if seen_header {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "end of stream inside frame headers",
                    )));
                }
                return Ok(None);
            }

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if !seen_header {
                    continue;
                }
                return content_length
                    .map(Some)
                    .ok_or(TransportError::MissingContentLength);
            }
            seen_header = true;

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| TransportError::InvalidHeader(line.to_string()))?;
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| TransportError::InvalidHeader(line.to_string()))?;
                if length > MAX_FRAME_LEN {
                    return Err(TransportError::InvalidHeader(format!(
                        "frame of {} bytes exceeds the {} byte limit",
                        length, MAX_FRAME_LEN
                    )));
                }
                content_length = Some(length);
            }
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for ContentLengthReader<R> {
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        let Some(length) = self.read_headers().await? else {
            return Ok(None);
        };
        let mut payload = vec![0u8; length];
        self.inner.read_exact(&mut payload).await?;
        Ok(Some(Bytes::from(payload)))
    }
}

/// Writes Content-Length framed payloads.
pub struct ContentLengthWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin + Send> ContentLengthWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for ContentLengthWriter<W> {
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        self.inner.write_all(header.as_bytes()).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        Ok(())
    }
}

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// One persistent duplex stream serving exactly one client.
pub struct StreamBinding {
    reader: BoxedRead,
    writer: BoxedWrite,
    log_frames: bool,
}

impl StreamBinding {
    pub fn new(
        reader: impl AsyncRead + Unpin + Send + 'static,
        writer: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            log_frames: false,
        }
    }

    /// Standard input and output.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    pub fn with_frame_logging(mut self, enabled: bool) -> Self {
        self.log_frames = enabled;
        self
    }
}

#[async_trait]
impl TransportBinding for StreamBinding {
    fn kind(&self) -> &'static str {
        "stream"
    }

    async fn serve(
        self: Box<Self>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let StreamBinding {
            reader,
            writer,
            log_frames,
        } = *self;
        let connection = Connection::with_options(
            ContentLengthWriter::new(writer),
            ConnectionOptions {
                log_frames,
                ..Default::default()
            },
        );
        let dispatcher = dispatcher.with_frame_logging(log_frames);
        info!(connection = %connection.id(), "Serving stream transport");

        tokio::select! {
            result = dispatcher.run_connection(connection.clone(), ContentLengthReader::new(reader)) => result,
            _ = shutdown.cancelled() => {
                debug!("Shutdown requested, closing stream transport");
                connection.close().await;
                Ok(())
            }
        }
    }
}
