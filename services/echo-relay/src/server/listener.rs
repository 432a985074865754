//! Listener and accept policy
//!
//! Binds the server port and runs every upgrade request through the accept
//! policy: origin first, then capacity, then sub-protocol negotiation. A
//! refused or failed handshake only ends that one request. Plain HTTP
//! requests are logged and answered with 404.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::cli::config::ServerConfig;
use crate::connection::protocol::{requests_protocol, websocket_config, SUB_PROTOCOL};
use crate::error::{PolicyRejection, RelayError, Result};
use crate::server::registry::{ConnectionRegistry, SessionPermit};
use crate::server::session::{self, SessionOptions};

/// Largest request head inspected before the upgrade handshake
const MAX_REQUEST_HEAD: usize = 8192;

/// How long a client may take to send its request head
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between peeks while the request head is still arriving
const PEEK_RETRY: Duration = Duration::from_millis(10);

const NOT_FOUND_RESPONSE: &[u8] =
    b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Origin and capacity checks applied to every upgrade request
#[derive(Debug)]
pub struct AcceptPolicy {
    allowed_origins: HashSet<String>,
    registry: ConnectionRegistry,
}

impl AcceptPolicy {
    pub fn new(allowed_origins: HashSet<String>, registry: ConnectionRegistry) -> Self {
        Self {
            allowed_origins,
            registry,
        }
    }

    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        origin.is_some_and(|origin| self.allowed_origins.contains(origin))
    }

    /// Decide whether a request with `origin` may open a session.
    ///
    /// On success the returned permit already holds a live-session slot.
    pub fn evaluate(&self, origin: Option<&str>) -> std::result::Result<SessionPermit, PolicyRejection> {
        debug!(origin = ?origin, "Checking origin");

        if !self.origin_allowed(origin) {
            warn!(origin = ?origin, "Connection from origin rejected");
            return Err(PolicyRejection::OriginNotAllowed {
                origin: origin.map(str::to_string),
            });
        }

        match self.registry.try_acquire() {
            Some(permit) => Ok(permit),
            None => {
                let limit = self.registry.max_connections();
                warn!(limit, "Connection rejected due to server capacity");
                Err(PolicyRejection::CapacityExceeded { limit })
            }
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

fn error_response(status: StatusCode, body: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = status;
    response
}

/// Perform the upgrade handshake on `stream` under `policy`.
///
/// Returns the upgraded stream together with the permit for its slot. When
/// the handshake fails after the policy admitted the request, the permit is
/// dropped here and the slot is returned.
pub async fn accept<T>(
    stream: T,
    remote_addr: SocketAddr,
    policy: &AcceptPolicy,
    config: WebSocketConfig,
) -> Result<(WebSocketStream<T>, SessionPermit)>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut outcome: Option<Result<SessionPermit>> = None;

    let callback = |request: &Request, mut response: Response| -> std::result::Result<Response, ErrorResponse> {
        debug!(remote = %remote_addr, path = %request.uri(), "Received upgrade request");

        let origin = request.headers().get(ORIGIN).and_then(|v| v.to_str().ok());
        let permit = match policy.evaluate(origin) {
            Ok(permit) => permit,
            Err(rejection) => {
                let reply = error_response(rejection.status(), rejection.to_string());
                outcome = Some(Err(rejection.into()));
                return Err(reply);
            }
        };

        let offered = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !requests_protocol(offered, SUB_PROTOCOL) {
            drop(permit);
            outcome = Some(Err(RelayError::ProtocolNotRequested(SUB_PROTOCOL)));
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("sub-protocol {} is required", SUB_PROTOCOL),
            ));
        }

        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUB_PROTOCOL));
        outcome = Some(Ok(permit));
        Ok(response)
    };

    let handshake = accept_hdr_async_with_config(stream, callback, Some(config)).await;

    match (handshake, outcome) {
        (Ok(stream), Some(Ok(permit))) => Ok((stream, permit)),
        (Err(_), Some(Err(e))) => Err(e),
        (Err(e), _) => Err(RelayError::Handshake(e)),
        (Ok(_), _) => Err(RelayError::Handshake(WsError::Protocol(
            ProtocolError::HandshakeIncomplete,
        ))),
    }
}

/// TCP listener for the echo server
pub struct Listener {
    listener: TcpListener,
    policy: Arc<AcceptPolicy>,
    ws_config: WebSocketConfig,
    options: SessionOptions,
}

impl Listener {
    /// Bind the address from `config`
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        Self::bind_to(config.socket_addr(), config).await
    }

    /// Bind an explicit address, using `config` for everything else
    pub async fn bind_to(addr: SocketAddr, config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let registry = ConnectionRegistry::new(config.max_connections);

        let listener = Self {
            listener,
            policy: Arc::new(AcceptPolicy::new(config.origin_set(), registry)),
            ws_config: websocket_config(config.max_frame_size, config.max_message_size),
            options: SessionOptions::from(config),
        };

        info!(addr = %listener.local_addr()?, "Server is listening");
        Ok(listener)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the live-session counter
    pub fn registry(&self) -> ConnectionRegistry {
        self.policy.registry().clone()
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending()).await;
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Sessions already running are left to finish on their own tasks.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Listener shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote_addr)) => {
                            let policy = self.policy.clone();
                            let ws_config = self.ws_config.clone();
                            let options = self.options;
                            tokio::spawn(async move {
                                handle_connection(stream, remote_addr, policy, ws_config, options).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept TCP connection");
                        }
                    }
                }
            }
        }
    }
}

/// Request line of an HTTP request head and whether it asks for a WebSocket
#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestHead {
    method: String,
    path: String,
    websocket_upgrade: bool,
    /// Bytes up to and including the blank line
    len: usize,
}

/// Parse the request head at the start of `bytes`.
///
/// Returns `None` until the blank line ending the head has arrived.
fn parse_request_head(bytes: &[u8]) -> Option<RequestHead> {
    let len = bytes.windows(4).position(|window| window == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&bytes[..len]);
    let mut lines = head.split("\r\n");

    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let websocket_upgrade = lines
        .filter_map(|line| line.split_once(':'))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.to_ascii_lowercase().contains("websocket")
        });

    Some(RequestHead {
        method,
        path,
        websocket_upgrade,
        len,
    })
}

/// Look at the request head without consuming it.
///
/// `None` means the head could not be inspected (peer closed early or the
/// head is oversized); the handshake then decides what to do with it.
async fn peek_request_head(stream: &TcpStream) -> std::io::Result<Option<RequestHead>> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        if let Some(head) = parse_request_head(&buf[..n]) {
            return Ok(Some(head));
        }
        if n == buf.len() {
            return Ok(None);
        }
        sleep(PEEK_RETRY).await;
    }
}

/// Consume the request head and answer 404
async fn respond_not_found(mut stream: TcpStream, head_len: usize) -> std::io::Result<()> {
    let mut head = vec![0u8; head_len];
    stream.read_exact(&mut head).await?;
    stream.write_all(NOT_FOUND_RESPONSE).await?;
    stream.shutdown().await
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    policy: Arc<AcceptPolicy>,
    ws_config: WebSocketConfig,
    options: SessionOptions,
) {
    match timeout(REQUEST_HEAD_TIMEOUT, peek_request_head(&stream)).await {
        Ok(Ok(Some(head))) if !head.websocket_upgrade => {
            info!(
                remote = %remote_addr,
                method = %head.method,
                path = %head.path,
                "Received request"
            );
            if let Err(e) = respond_not_found(stream, head.len).await {
                debug!(remote = %remote_addr, error = %e, "Error answering plain request");
            }
            return;
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!(remote = %remote_addr, error = %e, "Error reading request head");
            return;
        }
        Err(_) => {
            debug!(remote = %remote_addr, "Timed out waiting for request head");
            return;
        }
    }

    match accept(stream, remote_addr, &policy, ws_config).await {
        Ok((ws, permit)) => session::serve(ws, remote_addr, permit, options).await,
        Err(RelayError::Rejected(rejection)) => {
            debug!(remote = %remote_addr, reason = %rejection, "Upgrade request refused");
        }
        Err(e) => {
            error!(remote = %remote_addr, error = %e, "Error accepting connection");
        }
    }
}
