//! Client State Management
//!
//! The client's connection state machine. Transitions are validated and the
//! state can be inspected from other tasks while the client runs.

use parking_lot::RwLock;
use std::sync::Arc;

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No connection and no reconnect pending
    Disconnected,
    /// A connection attempt is pending or in flight
    Connecting,
    /// Connected and sending
    Connected,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Disconnected => write!(f, "Disconnected"),
            ClientState::Connecting => write!(f, "Connecting"),
            ClientState::Connected => write!(f, "Connected"),
        }
    }
}

struct ClientStateInner {
    current: ClientState,
    connection_attempts: u32,
}

/// Thread-safe client state manager
#[derive(Clone)]
pub struct ClientStateManager {
    inner: Arc<RwLock<ClientStateInner>>,
}

impl ClientStateManager {
    /// Create a new state manager starting in Disconnected state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ClientStateInner {
                current: ClientState::Disconnected,
                connection_attempts: 0,
            })),
        }
    }

    pub fn current_state(&self) -> ClientState {
        self.inner.read().current
    }

    /// Connection attempts since the last successful connection
    pub fn connection_attempts(&self) -> u32 {
        self.inner.read().connection_attempts
    }

    /// Transition to a new state. Returns `false` if the transition is not
    /// allowed from the current state.
    pub fn transition_to(&self, new_state: ClientState, reason: Option<String>) -> bool {
        let mut inner = self.inner.write();

        if !is_valid_transition(inner.current, new_state) {
            tracing::warn!(from = %inner.current, to = %new_state, "Rejected client state transition");
            return false;
        }

        let old_state = inner.current;
        if old_state == new_state {
            return true;
        }
        inner.current = new_state;

        match new_state {
            ClientState::Connected => {
                inner.connection_attempts = 0;
            }
            ClientState::Connecting => {
                inner.connection_attempts += 1;
            }
            ClientState::Disconnected => {}
        }

        tracing::debug!(
            from = %old_state,
            to = %new_state,
            reason = reason.as_deref().unwrap_or(""),
            attempts = inner.connection_attempts,
            "Client state transition"
        );

        true
    }

    pub fn set_connecting(&self, reason: &str) -> bool {
        self.transition_to(ClientState::Connecting, Some(reason.to_string()))
    }

    pub fn set_connected(&self) -> bool {
        self.transition_to(ClientState::Connected, Some("Connection established".to_string()))
    }

    pub fn set_disconnected(&self, reason: Option<String>) -> bool {
        self.transition_to(ClientState::Disconnected, reason)
    }

    pub fn is_connected(&self) -> bool {
        self.current_state() == ClientState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.current_state() == ClientState::Connecting
    }
}

impl Default for ClientStateManager {
    fn default() -> Self {
        Self::new()
    }
}

fn is_valid_transition(from: ClientState, to: ClientState) -> bool {
    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (ClientState::Disconnected, ClientState::Connecting)
            | (ClientState::Connecting, ClientState::Connected)
            | (ClientState::Connecting, ClientState::Disconnected)
            | (ClientState::Connected, ClientState::Disconnected)
    )
}
