//! Message Protocol
//!
//! Defines the payloads relayed over the `echo-protocol` sub-protocol and the
//! events a connection reports to its owner.

use std::fmt;

use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as Frame;

/// Sub-protocol negotiated by both ends during the upgrade handshake
pub const SUB_PROTOCOL: &str = "echo-protocol";

/// Origin declared by the client unless configured otherwise
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Largest frame the server accepts, in bytes
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Largest reassembled message the server accepts, in bytes
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Application payload carried by a data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    /// Extract the payload from a WebSocket frame.
    ///
    /// Control and raw frames carry no payload for the relay and yield `None`.
    /// Close frames are reported separately by the caller.
    pub fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Text(text) => Some(Message::Text(text)),
            Frame::Binary(data) => Some(Message::Binary(data)),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) | Frame::Frame(_) => None,
        }
    }

    /// Convert back into a frame for sending
    pub fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::Text(text),
            Message::Binary(data) => Frame::Binary(data),
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        match self {
            Message::Text(text) => text.len(),
            Message::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Binary(_) => "binary",
        }
    }
}

/// Close code and reason reported by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl From<CloseFrame<'_>> for CloseInfo {
    fn from(frame: CloseFrame<'_>) -> Self {
        Self {
            code: frame.code.into(),
            reason: frame.reason.into_owned(),
        }
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} - {}", self.code, self.reason)
        }
    }
}

/// Lifecycle events dispatched into a server session or the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The upgrade completed and the link is usable
    Connected,

    /// A text or binary message arrived
    MessageReceived(Message),

    /// The link ended, with the peer's close frame when one was received
    Closed(Option<CloseInfo>),

    /// A transport-level error; a `Closed` event always follows
    ErrorOccurred(String),
}

/// Transport limits applied to a WebSocket stream
pub fn websocket_config(max_frame_size: usize, max_message_size: usize) -> WebSocketConfig {
    WebSocketConfig {
        max_frame_size: Some(max_frame_size),
        max_message_size: Some(max_message_size),
        ..Default::default()
    }
}

/// Check a `Sec-WebSocket-Protocol` header value for `protocol`
pub fn requests_protocol(header: &str, protocol: &str) -> bool {
    header.split(',').any(|offered| offered.trim() == protocol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn test_control_frames_are_ignored() {
        assert_eq!(Message::from_frame(Frame::Ping(vec![1, 2])), None);
        assert_eq!(Message::from_frame(Frame::Pong(Vec::new())), None);
        assert_eq!(Message::from_frame(Frame::Close(None)), None);
    }

    #[test]
    fn test_data_frames_keep_their_kind() {
        let text = Message::from_frame(Frame::Text("hello".to_string())).unwrap();
        assert_eq!(text, Message::Text("hello".to_string()));
        assert_eq!(text.kind(), "text");
        assert_eq!(text.len(), 5);

        let binary = Message::from_frame(Frame::Binary(vec![0; 10])).unwrap();
        assert_eq!(binary.kind(), "binary");
        assert_eq!(binary.into_frame(), Frame::Binary(vec![0; 10]));
    }

    #[test]
    fn test_close_info_display() {
        let info = CloseInfo::from(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        });
        assert_eq!(info.code, 1000);
        assert_eq!(info.to_string(), "1000 - bye");

        let bare = CloseInfo {
            code: 1001,
            reason: String::new(),
        };
        assert_eq!(bare.to_string(), "1001");
    }

    #[test]
    fn test_requests_protocol() {
        assert!(requests_protocol("echo-protocol", SUB_PROTOCOL));
        assert!(requests_protocol("chat, echo-protocol", SUB_PROTOCOL));
        assert!(!requests_protocol("Echo-Protocol", SUB_PROTOCOL));
        assert!(!requests_protocol("", SUB_PROTOCOL));
    }

    #[test]
    fn test_websocket_config_limits() {
        let config = websocket_config(MAX_FRAME_SIZE, MAX_MESSAGE_SIZE);
        assert_eq!(config.max_frame_size, Some(1_048_576));
        assert_eq!(config.max_message_size, Some(1_048_576));
    }
}
