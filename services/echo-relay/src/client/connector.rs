//! Client transport
//!
//! A [`Connector`] opens a [`Connection`]: a pair of channels carrying
//! outbound commands and inbound [`SessionEvent`]s. The WebSocket connector
//! backs the channels with a pump task that owns the socket.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};
use tracing::{debug, warn};

use crate::cli::config::ClientConfig;
use crate::connection::protocol::{CloseInfo, Message, SessionEvent, SUB_PROTOCOL};
use crate::error::{RelayError, Result};

/// Buffer size for both connection channels
const CHANNEL_CAPACITY: usize = 64;

/// Request from the client to its transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(Message),
    Close,
}

/// Client end of an established connection
#[derive(Debug)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<SessionEvent>,
}

/// Transport end of a connection: receives commands, reports events
#[derive(Debug)]
pub struct TransportEnd {
    pub commands: mpsc::Receiver<Command>,
    pub events: mpsc::Sender<SessionEvent>,
}

impl Connection {
    /// Create a connected pair of client and transport ends
    pub fn pair() -> (Connection, TransportEnd) {
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Connection {
                commands: command_tx,
                events: event_rx,
            },
            TransportEnd {
                commands: command_rx,
                events: event_tx,
            },
        )
    }

    /// Whether the transport is still accepting commands
    pub fn is_connected(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Queue a message for sending
    pub async fn send(&self, message: Message) -> Result<()> {
        self.commands
            .send(Command::Send(message))
            .await
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// Next event from the transport. A vanished transport reads as a close.
    pub async fn next_event(&mut self) -> SessionEvent {
        self.events.recv().await.unwrap_or(SessionEvent::Closed(None))
    }

    /// Ask the transport to close the socket. Best effort.
    pub async fn close(self) {
        let _ = self.commands.send(Command::Close).await;
    }
}

/// Opens connections to the echo server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection
    async fn connect(&self) -> Result<Connection>;

    /// Target description used in logs
    fn target(&self) -> &str;
}

/// Connector for `ws://` and `wss://` URLs
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    origin: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: origin.into(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.url.clone(), config.origin.clone())
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection> {
        let mut request = self.url.as_str().into_client_request()?;
        let origin = HeaderValue::from_str(&self.origin)
            .map_err(|e| RelayError::Config(format!("invalid origin {:?}: {}", self.origin, e)))?;
        let headers = request.headers_mut();
        headers.insert(ORIGIN, origin);
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUB_PROTOCOL));

        let (stream, response) = connect_async(request).await.map_err(|source| RelayError::Connect {
            url: self.url.clone(),
            source,
        })?;
        debug!(status = %response.status(), "Handshake complete");

        let (connection, transport) = Connection::pair();
        let (write, read) = stream.split();
        tokio::spawn(pump(write, read, transport));
        Ok(connection)
    }

    fn target(&self) -> &str {
        &self.url
    }
}

/// Move frames between the socket halves and the connection channels until
/// either side goes away.
///
/// A failed write ends the connection: the client sees `ErrorOccurred`
/// followed by `Closed`, the same as a failed read.
async fn pump<W, R>(mut write: W, mut read: R, transport: TransportEnd)
where
    W: Sink<Frame, Error = WsError> + Unpin,
    R: Stream<Item = std::result::Result<Frame, WsError>> + Unpin,
{
    let TransportEnd {
        mut commands,
        events,
    } = transport;

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Send(message)) => {
                        if let Err(e) = write.send(message.into_frame()).await {
                            warn!(error = %e, "Error sending message");
                            let _ = events.send(SessionEvent::ErrorOccurred(e.to_string())).await;
                            let _ = events.send(SessionEvent::Closed(None)).await;
                            break;
                        }
                    }
                    Some(Command::Close) | None => {
                        if let Err(e) = write.close().await {
                            debug!(error = %e, "Error while closing connection");
                        }
                        break;
                    }
                }
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Frame::Close(frame))) => {
                        let _ = events.send(SessionEvent::Closed(frame.map(CloseInfo::from))).await;
                        break;
                    }
                    Some(Ok(frame)) => {
                        if let Some(message) = Message::from_frame(frame) {
                            if events.send(SessionEvent::MessageReceived(message)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = events.send(SessionEvent::ErrorOccurred(e.to_string())).await;
                        let _ = events.send(SessionEvent::Closed(None)).await;
                        break;
                    }
                    None => {
                        let _ = events.send(SessionEvent::Closed(None)).await;
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_pair_round_trip() {
        let (mut connection, mut transport) = Connection::pair();
        assert!(connection.is_connected());

        connection
            .send(Message::Text("42".to_string()))
            .await
            .unwrap();
        assert_eq!(
            transport.commands.recv().await,
            Some(Command::Send(Message::Text("42".to_string())))
        );

        transport
            .events
            .send(SessionEvent::MessageReceived(Message::Text("42".to_string())))
            .await
            .unwrap();
        assert_eq!(
            connection.next_event().await,
            SessionEvent::MessageReceived(Message::Text("42".to_string()))
        );
    }

    #[tokio::test]
    async fn test_dropped_transport_reads_as_close() {
        let (mut connection, transport) = Connection::pair();
        drop(transport);

        assert!(!connection.is_connected());
        assert_eq!(connection.next_event().await, SessionEvent::Closed(None));
        assert!(matches!(
            connection.send(Message::Text("late".to_string())).await,
            Err(RelayError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_failure_reports_error_then_close() {
        let failing = Box::pin(futures_util::sink::unfold((), |(), _frame: Frame| async {
            Err::<(), WsError>(WsError::ConnectionClosed)
        }));
        let silent = futures_util::stream::pending::<std::result::Result<Frame, WsError>>();

        let (mut connection, transport) = Connection::pair();
        let pump = tokio::spawn(pump(failing, silent, transport));

        connection
            .send(Message::Text("7".to_string()))
            .await
            .unwrap();
        assert!(matches!(
            connection.next_event().await,
            SessionEvent::ErrorOccurred(_)
        ));
        assert_eq!(connection.next_event().await, SessionEvent::Closed(None));

        pump.await.unwrap();
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_close_command_closes_the_sink() {
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Frame>();
        let recording = Box::pin(futures_util::sink::unfold(frames_tx, |tx, frame: Frame| async move {
            let _ = tx.send(frame);
            Ok::<_, WsError>(tx)
        }));
        let silent = futures_util::stream::pending::<std::result::Result<Frame, WsError>>();

        let (connection, transport) = Connection::pair();
        let pump = tokio::spawn(pump(recording, silent, transport));

        connection.send(Message::Text("1".to_string())).await.unwrap();
        connection.close().await;
        pump.await.unwrap();

        assert_eq!(frames_rx.recv().await, Some(Frame::Text("1".to_string())));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(format!("ws://{}/", addr), "http://localhost:3000");
        let err = connector.connect().await.unwrap_err();
        assert!(matches!(err, RelayError::Connect { .. }));
        assert_eq!(connector.target(), format!("ws://{}/", addr));
    }
}
