//! Connection Session
//!
//! One accepted connection on the server. Inbound frames are echoed back on
//! the same connection and a keep-alive ping is sent on a fixed interval.
//! Every lifecycle change arrives as a [`SessionEvent`] through
//! [`ConnectionSession::handle`].

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cli::config::ServerConfig;
use crate::connection::protocol::{CloseInfo, Message, SessionEvent, MAX_MESSAGE_SIZE};
use crate::connection::sink::{FrameSink, WsSink};
use crate::connection::timer::{KeepAliveTimer, DEFAULT_KEEPALIVE_INTERVAL};
use crate::server::registry::SessionPermit;

/// Lifecycle of a server session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted but not yet announced as connected
    Pending,
    /// Relaying messages
    Open,
    /// Cleanup in progress
    Closing,
    /// Cleanup done; further events are ignored
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Pending => write!(f, "Pending"),
            SessionState::Open => write!(f, "Open"),
            SessionState::Closing => write!(f, "Closing"),
            SessionState::Closed => write!(f, "Closed"),
        }
    }
}

/// Per-session settings derived from the server configuration
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub keepalive_interval: Duration,
    pub max_message_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&ServerConfig> for SessionOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Server-side state for one accepted connection
pub struct ConnectionSession<S: FrameSink> {
    id: Uuid,
    remote_addr: SocketAddr,
    state: SessionState,
    sink: S,
    keepalive: KeepAliveTimer,
    permit: SessionPermit,
    max_message_size: usize,
    opened_at: DateTime<Utc>,
}

impl<S: FrameSink> ConnectionSession<S> {
    /// Create a session for an accepted connection holding `permit`
    pub fn new(remote_addr: SocketAddr, permit: SessionPermit, sink: S, options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
            state: SessionState::Pending,
            sink,
            keepalive: KeepAliveTimer::new(options.keepalive_interval),
            permit,
            max_message_size: options.max_message_size,
            opened_at: Utc::now(),
        }
    }

    /// Open and the outbound half still usable
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Open && self.sink.is_connected()
    }

    /// Dispatch one lifecycle event
    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => self.on_connected(),
            SessionEvent::MessageReceived(message) => self.on_message(message).await,
            SessionEvent::Closed(info) => self.on_close(info).await,
            SessionEvent::ErrorOccurred(description) => {
                error!(
                    session_id = %self.id,
                    remote = %self.remote_addr,
                    error = %description,
                    "Connection error"
                );
            }
        }
    }

    /// Wait until the next keep-alive ping is due
    pub async fn keepalive_due(&mut self) {
        self.keepalive.due().await;
    }

    /// Send a keep-alive ping if the connection is still up.
    ///
    /// A failed ping stops the keep-alive timer but leaves the session open.
    pub async fn on_keepalive_tick(&mut self) {
        if !self.is_connected() {
            return;
        }

        match self.sink.send_frame(Frame::Ping(Vec::new())).await {
            Ok(()) => {
                self.keepalive.record_probe();
                debug!(session_id = %self.id, "Sent keep-alive ping");
            }
            Err(e) => {
                error!(session_id = %self.id, error = %e, "Error sending ping");
                self.keepalive.cancel();
            }
        }
    }

    fn on_connected(&mut self) {
        if self.state != SessionState::Pending {
            debug!(session_id = %self.id, state = %self.state, "Ignoring duplicate connect event");
            return;
        }

        self.state = SessionState::Open;
        self.opened_at = Utc::now();
        self.keepalive.arm();

        info!(
            session_id = %self.id,
            remote = %self.remote_addr,
            connections = self.permit.registry().live(),
            "Connection accepted"
        );
    }

    async fn on_message(&mut self, message: Message) {
        if self.state != SessionState::Open {
            debug!(session_id = %self.id, state = %self.state, "Dropping message outside open state");
            return;
        }

        if message.len() > self.max_message_size {
            warn!(
                session_id = %self.id,
                size = message.len(),
                limit = self.max_message_size,
                "Dropping oversized message"
            );
            return;
        }

        match &message {
            Message::Text(text) => {
                info!(session_id = %self.id, message = %text, "Received message");
            }
            Message::Binary(data) => {
                info!(session_id = %self.id, bytes = data.len(), "Received binary message");
            }
        }

        let kind = message.kind();
        if let Err(e) = self.sink.send_frame(message.into_frame()).await {
            error!(session_id = %self.id, kind, error = %e, "Error echoing message");
        }
    }

    async fn on_close(&mut self, info: Option<CloseInfo>) {
        if self.state == SessionState::Closed {
            debug!(session_id = %self.id, "Session already closed");
            return;
        }
        self.state = SessionState::Closing;

        self.keepalive.cancel();
        let remaining = self.permit.release();
        self.sink.close().await;
        self.state = SessionState::Closed;

        let (code, reason) = match &info {
            Some(info) => (Some(info.code), info.reason.as_str()),
            None => (None, ""),
        };
        info!(
            session_id = %self.id,
            remote = %self.remote_addr,
            code = ?code,
            reason = %reason,
            probes = self.keepalive.probes_sent(),
            open_secs = (Utc::now() - self.opened_at).num_seconds(),
            "Peer disconnected"
        );
        if let Some(remaining) = remaining {
            info!(connections = remaining, "Current connections");
        }
    }
}

#[cfg(test)]
impl<S: FrameSink> ConnectionSession<S> {
    fn state(&self) -> SessionState {
        self.state
    }

    fn keepalive_armed(&self) -> bool {
        self.keepalive.is_armed()
    }

    fn probes_sent(&self) -> u64 {
        self.keepalive.probes_sent()
    }

    fn sink(&self) -> &S {
        &self.sink
    }
}

/// Drive an accepted WebSocket until it closes.
///
/// Inbound frames and keep-alive ticks are multiplexed on this task, so the
/// session needs no locking.
pub async fn serve<T>(
    stream: WebSocketStream<T>,
    remote_addr: SocketAddr,
    permit: SessionPermit,
    options: SessionOptions,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (write, mut read) = stream.split();
    let mut session = ConnectionSession::new(remote_addr, permit, WsSink::new(write), options);
    session.handle(SessionEvent::Connected).await;

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Frame::Close(frame))) => {
                        session.handle(SessionEvent::Closed(frame.map(CloseInfo::from))).await;
                        break;
                    }
                    Some(Ok(frame)) => {
                        if let Some(message) = Message::from_frame(frame) {
                            session.handle(SessionEvent::MessageReceived(message)).await;
                        }
                    }
                    Some(Err(e)) => {
                        session.handle(SessionEvent::ErrorOccurred(e.to_string())).await;
                        session.handle(SessionEvent::Closed(None)).await;
                        break;
                    }
                    None => {
                        session.handle(SessionEvent::Closed(None)).await;
                        break;
                    }
                }
            }

            _ = session.keepalive_due() => {
                session.on_keepalive_tick().await;
            }
        }
    }
}
