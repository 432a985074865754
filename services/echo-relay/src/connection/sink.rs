//! Frame Sink
//!
//! The write half of a connection as seen by a server session. Abstracted so
//! sessions can be driven with synthetic events in tests.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};

use crate::error::{RelayError, Result};

/// Outbound half of a WebSocket connection
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame and flush it
    async fn send_frame(&mut self, frame: Frame) -> Result<()>;

    /// Whether the link is still believed to be usable
    fn is_connected(&self) -> bool;

    /// Close the outbound half. Closing twice is a no-op.
    async fn close(&mut self);
}

/// `FrameSink` over any tungstenite frame sink, such as the write half of a
/// split `WebSocketStream`
pub struct WsSink<S> {
    inner: S,
    connected: bool,
}

impl<S> WsSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            connected: true,
        }
    }
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: Sink<Frame, Error = WsError> + Unpin + Send,
{
    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.connected {
            return Err(RelayError::ConnectionClosed);
        }

        match self.inner.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(
                    e,
                    WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_)
                ) {
                    self.connected = false;
                }
                Err(e.into())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        if let Err(e) = self.inner.close().await {
            tracing::debug!(error = %e, "Error while closing connection");
        }
    }
}
