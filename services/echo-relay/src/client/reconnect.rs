//! Reconnecting Client
//!
//! Keeps one connection to the echo server open, reconnecting at a fixed
//! interval whenever it drops, and sends a random number on every tick of
//! the send timer while connected.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout, Sleep};
use tracing::{debug, error, info, warn};

use crate::cli::config::ClientConfig;
use crate::client::connector::{Connection, Connector};
use crate::client::state::{ClientState, ClientStateManager};
use crate::connection::protocol::{CloseInfo, Message, SessionEvent};
use crate::connection::timer::PeriodicTimer;
use crate::error::RelayError;

/// Largest value the send loop produces
pub const MAX_PAYLOAD_VALUE: u32 = 0xFF_FFFF;

/// Client that maintains a single persistent connection
pub struct ReconnectingClient<C: Connector> {
    connector: C,
    reconnect_interval: Duration,
    send_interval: Duration,
    connect_timeout: Duration,
    state: ClientStateManager,
    connection: Option<Connection>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    send_timer: PeriodicTimer,
    messages_sent: u64,
}

impl<C: Connector> ReconnectingClient<C> {
    pub fn new(config: &ClientConfig, connector: C) -> Self {
        Self {
            connector,
            reconnect_interval: config.reconnect_interval(),
            send_interval: config.send_interval(),
            connect_timeout: config.connect_timeout(),
            state: ClientStateManager::new(),
            connection: None,
            reconnect_timer: None,
            send_timer: PeriodicTimer::stopped(),
            messages_sent: 0,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state.current_state()
    }

    /// Shared handle to the state machine, for observers on other tasks
    pub fn state_manager(&self) -> ClientStateManager {
        self.state.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_connected)
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    pub fn send_loop_active(&self) -> bool {
        self.send_timer.is_active()
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Attempt to connect. Failures are logged and schedule a reconnect.
    pub async fn connect(&mut self) {
        if self.state() == ClientState::Connected {
            debug!("Already connected");
            return;
        }
        self.state.set_connecting("Initiating connection");
        info!(url = %self.connector.target(), "Connecting");

        let attempt = match timeout(self.connect_timeout, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::ConnectTimeout(self.connect_timeout)),
        };

        match attempt {
            Ok(connection) => {
                self.connection = Some(connection);
                self.handle_event(SessionEvent::Connected).await;
            }
            Err(e) => {
                error!(error = %e, "Connect error");
                self.state.set_disconnected(Some(e.to_string()));
                self.schedule_reconnect();
            }
        }
    }

    /// Arm the reconnect timer unless an attempt is already pending.
    ///
    /// Returns `true` if a timer was armed.
    pub fn schedule_reconnect(&mut self) -> bool {
        if self.state.is_connecting() {
            debug!("Reconnect already pending");
            return false;
        }

        self.state.set_connecting("Reconnect scheduled");
        info!(
            interval = ?self.reconnect_interval,
            attempt = self.state.connection_attempts(),
            "Scheduling reconnect"
        );
        self.reconnect_timer = Some(Box::pin(sleep(self.reconnect_interval)));
        true
    }

    /// Dispatch one connection event
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                self.state.set_connected();
                info!("WebSocket client connected");
                self.send_timer = PeriodicTimer::start_immediate(self.send_interval);
            }
            SessionEvent::MessageReceived(Message::Text(text)) => {
                info!(message = %text, "Received");
            }
            SessionEvent::MessageReceived(Message::Binary(data)) => {
                debug!(bytes = data.len(), "Received binary message");
            }
            SessionEvent::ErrorOccurred(description) => {
                warn!(error = %description, "Connection error");
            }
            SessionEvent::Closed(info) => self.on_close(info),
        }
    }

    fn on_close(&mut self, info: Option<CloseInfo>) {
        match &info {
            Some(info) => info!(code = info.code, reason = %info.reason, "Connection closed"),
            None => info!("Connection closed"),
        }

        self.send_timer.cancel();
        self.connection = None;
        self.state
            .set_disconnected(info.map(|info| info.to_string()));
        self.schedule_reconnect();
    }

    /// Send one random number if the connection is still up.
    ///
    /// The send timer stops when there is no live connection or the send
    /// fails; the next successful connection starts it again.
    pub async fn on_send_tick(&mut self) {
        let Some(connection) = self.connection.as_ref().filter(|c| c.is_connected()) else {
            debug!("No live connection, stopping send loop");
            self.send_timer.cancel();
            return;
        };

        let payload = random_payload();
        match connection.send(Message::Text(payload)).await {
            Ok(()) => self.messages_sent += 1,
            Err(e) => {
                error!(error = %e, "Error sending message");
                self.send_timer.cancel();
            }
        }
    }

    /// Wait for the next timer or connection event and handle it
    pub async fn step(&mut self) {
        tokio::select! {
            _ = reconnect_due(&mut self.reconnect_timer) => {
                self.reconnect_timer = None;
                self.connect().await;
            }

            _ = self.send_timer.tick() => {
                self.on_send_tick().await;
            }

            event = next_event(&mut self.connection) => {
                self.handle_event(event).await;
            }
        }
    }

    /// Run until `shutdown` resolves, then close the connection
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        if self.state() == ClientState::Disconnected {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.shutdown().await;
                    return;
                }
                _ = self.connect() => {}
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.step() => {}
            }
        }

        self.shutdown().await;
    }

    /// Cancel timers and close the live connection, if any
    pub async fn shutdown(&mut self) {
        info!("Shutting down client");
        self.reconnect_timer = None;
        self.send_timer.cancel();

        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.state.set_disconnected(Some("Shutdown requested".to_string()));
    }
}

/// Decimal string of a random value in `0..=MAX_PAYLOAD_VALUE`
pub fn random_payload() -> String {
    rand::thread_rng().gen_range(0..=MAX_PAYLOAD_VALUE).to_string()
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_event(connection: &mut Option<Connection>) -> SessionEvent {
    match connection {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}
