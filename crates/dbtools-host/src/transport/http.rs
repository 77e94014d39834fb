//! HTTP server transport.
//!
//! Any request carrying a WebSocket upgrade handshake becomes a long-lived
//! [`Connection`]. Plain HTTP is served too:
//! - `GET /health`: liveness check
//! - `POST`: one frame per request body, answered in the response body
//! - `OPTIONS`: CORS preflight

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{
    ALLOW, CONNECTION, CONTENT_TYPE, ORIGIN, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use dbtools_json_rpc::{Frame, decode};

use super::{CorsPolicy, MessageWriter, TransportBinding, websocket};
use crate::connection::{Connection, ConnectionOptions};
use crate::dispatch::Dispatcher;
use crate::error::TransportError;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_LISTEN_PORT: u16 = 8443;

/// Pause after a failed `accept` (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Largest accepted `POST` body
pub const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Configuration for the network transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebServerConfig {
    pub listen_address: String,
    /// `0` picks a free port; see [`NetworkBinding::local_addr`]
    pub listen_port: u16,
    /// Log every frame and accept WebSocket upgrades from any origin
    pub debug: bool,
    /// Turn off HTTP keep-alive and close each WebSocket after its first reply
    pub disable_keep_alive: bool,
    /// Reflect any request `Origin` back as allowed
    pub enable_dynamic_cors: bool,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            debug: false,
            disable_keep_alive: false,
            enable_dynamic_cors: false,
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl WebServerConfig {
    pub fn cors_policy(&self) -> CorsPolicy {
        CorsPolicy::from_options(self.enable_dynamic_cors, &self.cors_allowed_origins)
    }
}

/// A bound listener waiting to be served.
pub struct NetworkBinding {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: WebServerConfig,
}

impl NetworkBinding {
    /// Bind the listener without accepting anything yet.
    pub async fn bind(config: WebServerConfig) -> Result<Self, TransportError> {
        let listener =
            TcpListener::bind((config.listen_address.as_str(), config.listen_port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Web server listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &WebServerConfig {
        &self.config
    }
}

/// Shared by every HTTP connection of one binding.
#[derive(Clone)]
struct HttpState {
    dispatcher: Dispatcher,
    config: Arc<WebServerConfig>,
    cors: Arc<CorsPolicy>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

#[async_trait]
impl TransportBinding for NetworkBinding {
    fn kind(&self) -> &'static str {
        "network"
    }

    async fn serve(
        self: Box<Self>,
        dispatcher: Dispatcher,
        shutdown: CancellationToken,
    ) -> Result<(), TransportError> {
        let NetworkBinding {
            listener, config, ..
        } = *self;
        let state = HttpState {
            dispatcher: dispatcher.with_frame_logging(config.debug),
            cors: Arc::new(config.cors_policy()),
            config: Arc::new(config),
            shutdown: shutdown.clone(),
            tasks: TaskTracker::new(),
        };

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!("Failed to accept connection: {}", err);
                        if accept_backoff(&shutdown).await {
                            continue;
                        }
                        break;
                    }
                },
            };
            debug!("New connection from {}", peer_addr);

            let conn_state = state.clone();
            state.tasks.spawn(async move {
                let shutdown = conn_state.shutdown.clone();
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle_request(req, conn_state.clone()));
                // Keep-alive must stay on here: hyper rewrites a 101 to `Connection: upgrade, close`
                // otherwise. Plain responses carry `Connection: close` instead.
                let conn = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades();
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(err) = result {
                    if err.is_incomplete_message() || err.is_canceled() {
                        debug!("Client disconnected: {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }

        state.tasks.close();
        state.tasks.wait().await;
        info!("Web server stopped");
        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: HttpState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    debug!("Handling {} {}", req.method(), req.uri().path());

    let mut response = if is_websocket_upgrade(req.headers()) {
        upgrade_websocket(req, &state, origin.clone())
    } else {
        match (req.method(), req.uri().path()) {
            (&Method::OPTIONS, _) => status_response(StatusCode::NO_CONTENT),
            (&Method::GET, "/health") => json_response(StatusCode::OK, &json!({"status": "ok"})),
            (&Method::POST, _) => handle_post(req, &state, origin.clone()).await,
            (&Method::GET, _) => text_response(StatusCode::NOT_FOUND, "Not Found"),
            _ => {
                let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                response
                    .headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("GET, POST, OPTIONS"));
                response
            }
        }
    };

    state.cors.apply(response.headers_mut(), origin.as_deref());
    if state.config.disable_keep_alive && response.status() != StatusCode::SWITCHING_PROTOCOLS {
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }
    Ok(response)
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    let upgrade_websocket = headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"));
    connection_upgrade && upgrade_websocket
}

fn upgrade_websocket(
    mut req: Request<Incoming>,
    state: &HttpState,
    origin: Option<String>,
) -> Response<Full<Bytes>> {
    if let Some(origin) = origin.as_deref() {
        if !state.config.debug && !state.cors.allows(origin) {
            warn!(origin, "Refusing WebSocket upgrade from disallowed origin");
            return text_response(StatusCode::FORBIDDEN, "Origin not allowed");
        }
    }
    if req
        .headers()
        .get(SEC_WEBSOCKET_VERSION)
        .is_none_or(|version| version.as_bytes() != b"13")
    {
        let mut response = text_response(StatusCode::UPGRADE_REQUIRED, "Unsupported WebSocket version");
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        return response;
    }
    let Some(accept) = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()))
        .and_then(|accept| HeaderValue::from_str(&accept).ok())
    else {
        return text_response(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
    };

    let ws_state = state.clone();
    state.tasks.spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                serve_websocket(socket, ws_state, origin).await;
            }
            Err(err) => warn!("WebSocket upgrade failed: {}", err),
        }
    });

    let mut response = status_response(StatusCode::SWITCHING_PROTOCOLS);
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

async fn serve_websocket<S>(socket: WebSocketStream<S>, state: HttpState, origin: Option<String>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (reader, writer) = websocket::split(socket);
    let connection = Connection::with_options(
        writer,
        ConnectionOptions {
            close_after_reply: state.config.disable_keep_alive,
            log_frames: state.config.debug,
            origin,
            one_way: false,
        },
    );

    tokio::select! {
        result = state.dispatcher.run_connection(connection.clone(), reader) => {
            if let Err(err) = result {
                debug!(connection = %connection.id(), "WebSocket connection ended: {}", err);
            }
        }
        _ = state.shutdown.cancelled() => connection.close().await,
    }
}

/// Dispatch the single frame of a `POST` body on a one-shot connection.
async fn handle_post(
    req: Request<Incoming>,
    state: &HttpState,
    origin: Option<String>,
) -> Response<Full<Bytes>> {
    let body = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            return text_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
        Err(err) => {
            debug!("Failed to read request body: {}", err);
            return text_response(StatusCode::BAD_REQUEST, "Unreadable request body");
        }
    };

    let frame = match decode(&body) {
        Ok(frame) => frame,
        Err(err) => {
            warn!("Malformed POST frame: {}", err);
            let reply = err
                .to_response()
                .unwrap_or_else(|| dbtools_json_rpc::JsonRpcError::new(None, err.error_object()));
            return match serde_json::to_value(&reply) {
                Ok(value) => json_response(StatusCode::BAD_REQUEST, &value),
                Err(_) => text_response(StatusCode::BAD_REQUEST, "Malformed frame"),
            };
        }
    };

    let (writer, mut replies) = ReplyCapture::new();
    let connection = Connection::with_options(
        writer,
        ConnectionOptions {
            close_after_reply: true,
            log_frames: state.config.debug,
            origin,
            one_way: true,
        },
    );

    match frame {
        Frame::Request(_) => {
            let closed = connection.cancellation_token();
            state.dispatcher.dispatch_frame(&connection, frame).await;
            closed.cancelled().await;

            // Notifications emitted while handling precede the reply; the reply closes the connection.
            let mut reply = None;
            while let Ok(payload) = replies.try_recv() {
                reply = Some(payload);
            }
            match reply {
                Some(payload) => {
                    let mut response = Response::new(Full::new(payload));
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                    response
                }
                None => text_response(StatusCode::INTERNAL_SERVER_ERROR, "No reply produced"),
            }
        }
        Frame::Notification(_) => {
            state.dispatcher.dispatch_frame(&connection, frame).await;
            status_response(StatusCode::NO_CONTENT)
        }
        Frame::Response(_) | Frame::Error(_) => {
            connection.close().await;
            text_response(StatusCode::BAD_REQUEST, "Unexpected response frame")
        }
    }
}

/// Writer of a one-shot connection: keeps what was written for the HTTP response.
struct ReplyCapture {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl ReplyCapture {
    fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl MessageWriter for ReplyCapture {
    async fn write_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Bytes::copy_from_slice(payload))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::default());
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Wait out [`ACCEPT_BACKOFF`]. `false` when shutdown was requested meanwhile.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}
