use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::transport::{Transport, TransportEvent};
use crate::protocol::{Command, Topic};
use crate::ui_sync::Alert;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub messages_sent: usize,
    pub messages_dropped: usize,
    pub messages_received: usize,
}

/// Owns the broker session lifecycle and the ready-to-send gate.
///
/// State only moves on transport callbacks, except for `Connecting` which is
/// entered when a connect is initiated. Nothing is queued while the gate is
/// closed.
pub struct ConnectionManager {
    state: ConnectionState,
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedSender<TransportEvent>,
    stats: ConnectionStats,
    unlocked: bool,
}

impl ConnectionManager {
    pub fn new(
        transport: Box<dyn Transport>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport,
            events,
            stats: ConnectionStats::default(),
            unlocked: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// True once the first connect has succeeded
    pub fn controls_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn connect(&mut self) -> Option<Alert> {
        info!("Initiating broker connection");
        self.state = ConnectionState::Connecting;

        match self.transport.connect(self.events.clone()) {
            Ok(()) => None,
            Err(e) => Some(self.on_connect_failed(e.to_string())),
        }
    }

    /// Full teardown and connect, only from `Disconnected`
    pub fn reconnect(&mut self) -> Option<Alert> {
        if self.state != ConnectionState::Disconnected {
            debug!("Reconnect ignored while {:?}", self.state);
            return None;
        }
        self.transport.disconnect();
        self.connect()
    }

    pub fn on_connected(&mut self) {
        info!("Broker connection established");
        self.state = ConnectionState::Connected;
        self.unlocked = true;

        for topic in Topic::SUBSCRIPTIONS {
            if let Err(e) = self.transport.subscribe(topic.name()) {
                error!("Subscribe request for {} failed: {}", topic, e);
            }
        }
    }

    pub fn on_connect_failed(&mut self, reason: String) -> Alert {
        error!("Broker connection failed: {}", reason);
        self.state = ConnectionState::Disconnected;
        Alert::new("MQTT Failure", reason)
    }

    /// Camera and capture state are left alone
    pub fn on_connection_lost(&mut self, reason: &str) {
        warn!("Broker connection lost: {}", reason);
        self.state = ConnectionState::Disconnected;
    }

    pub fn on_subscribed(&mut self, topic: &str, granted: bool) {
        if granted {
            info!("Subscribed to {}", topic);
        } else {
            error!("Broker rejected subscription to {}", topic);
        }
    }

    pub fn on_message(&mut self) {
        self.stats.messages_received += 1;
    }

    /// Publishes `payload` verbatim, or drops it when not connected.
    ///
    /// Returns whether the message was handed to the transport.
    pub fn publish(&mut self, topic: Topic, payload: Vec<u8>) -> bool {
        if !self.is_connected() {
            warn!(
                "Dropping publish to {} ({} bytes): not connected",
                topic,
                payload.len()
            );
            self.stats.messages_dropped += 1;
            return false;
        }

        match self.transport.publish(topic.name(), payload) {
            Ok(()) => {
                self.stats.messages_sent += 1;
                true
            }
            Err(e) => {
                error!("Publish to {} failed: {}", topic, e);
                self.stats.messages_dropped += 1;
                false
            }
        }
    }

    pub fn send(&mut self, command: Command) -> bool {
        let (topic, payload) = command.encode();
        self.publish(topic, payload)
    }

    pub fn shutdown(&mut self) {
        info!("Closing broker connection");
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
    }
}
