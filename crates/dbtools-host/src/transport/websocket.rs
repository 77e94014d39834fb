//! WebSocket message halves. Each text or binary message carries one frame.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::{MessageReader, MessageWriter};
use crate::error::TransportError;

pub struct WsReader<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

pub struct WsWriter<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// Split an established WebSocket into transport halves.
pub fn split<S>(socket: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = socket.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

#[async_trait]
impl<S> MessageReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_message(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::copy_from_slice(text.as_bytes()))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None);
                }
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl<S> MessageWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| TransportError::InvalidHeader(format!("frame is not UTF-8: {}", e)))?;
        self.inner.send(Message::text(text.to_owned())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
