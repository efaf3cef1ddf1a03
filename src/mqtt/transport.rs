//! Transport adapter around rumqttc.
//!
//! The rest of the client only sees the [`Transport`] trait: connect,
//! subscribe, publish, disconnect, and a stream of [`TransportEvent`]s. The
//! rumqttc implementation runs one typestate session per connect cycle:
//!
//! ```text
//! MqttSession<Configured> ──start()──► MqttSession<Running> ──stop()──► (dropped)
//!                                            │
//!                                     poller task: EventLoop::poll()
//!                                            │
//!                                            ▼
//!                                   mpsc<TransportEvent>
//! ```
//!
//! The poller never reconnects on its own. After the first connection error
//! it reports `ConnectFailed` (no ConnAck yet) or `ConnectionLost` (after
//! ConnAck) and exits; recovery is a full manual `connect()`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, Transport as WireTransport,
};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{BrokerConfig, BrokerEndpoint, TransportKind};
use super::message::MessageEvent;

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 64;

/// Lifecycle callbacks and deliveries from the transport
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    ConnectFailed(String),
    Message(MessageEvent),
    Subscribed { topic: String, granted: bool },
    ConnectionLost(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport has no running session")]
    NotRunning,

    #[error("Client request rejected: {0}")]
    Client(#[from] ClientError),

    #[error("Connect could not be initiated: {0}")]
    Connect(String),
}

/// Boundary to the pub/sub library.
///
/// Requests are fire-and-forget; results arrive asynchronously on the event
/// channel handed to `connect`.
pub trait Transport: Send {
    fn connect(
        &mut self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    fn disconnect(&mut self);
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionState {
    Configured,
    Running,
}

/// One broker session, from options to a running poller
#[machine]
pub struct MqttSession<S: SessionState> {
    endpoint: BrokerEndpoint,
    client: AsyncClient,
    event_loop: Option<EventLoop>,
    // Topics whose SUBSCRIBE has been requested but not yet seen leaving the event loop
    pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
    shutdown: CancellationToken,
}

impl MqttSession<Configured> {
    pub fn configure(endpoint: BrokerEndpoint) -> Self {
        let options = mqtt_options(&endpoint);
        debug!(
            "Configured MQTT session {:?} (keep-alive {:?})",
            options.broker_address(),
            options.keep_alive()
        );
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        Self::new(
            endpoint,
            client,
            Some(event_loop),
            Arc::new(Mutex::new(VecDeque::new())), // pending_subscriptions
            CancellationToken::new(),              // shutdown
        )
    }

    /// Spawns the poller and transitions to Running
    pub fn start(mut self, events: mpsc::UnboundedSender<TransportEvent>) -> MqttSession<Running> {
        if let Some(event_loop) = self.event_loop.take() {
            let poller = run_event_loop(
                event_loop,
                events,
                self.pending_subscriptions.clone(),
                self.endpoint.connect_timeout,
                self.shutdown.clone(),
            );
            tokio::spawn(poller);
        }
        self.transition()
    }
}

impl MqttSession<Running> {
    pub fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let mut pending = self
            .pending_subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.push_back(topic.to_string());

        if let Err(e) = self.client.try_subscribe(topic, QoS::AtMostOnce) {
            pending.pop_back();
            return Err(e.into());
        }
        Ok(())
    }

    pub fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    pub fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        info!("MQTT session {} stopped", self.endpoint.client_id);
    }
}

fn mqtt_options(endpoint: &BrokerEndpoint) -> MqttOptions {
    let mut options = MqttOptions::new(
        endpoint.client_id.clone(),
        endpoint.broker_addr(),
        endpoint.port,
    );
    options
        .set_keep_alive(endpoint.keep_alive)
        .set_max_packet_size(endpoint.max_packet_size, endpoint.max_packet_size)
        .set_clean_session(true);

    let wire = match (endpoint.kind, endpoint.secure) {
        (TransportKind::Websocket, false) => WireTransport::Ws,
        (TransportKind::Websocket, true) => WireTransport::wss_with_default_config(),
        (TransportKind::Tcp, false) => WireTransport::Tcp,
        (TransportKind::Tcp, true) => WireTransport::tls_with_default_config(),
    };
    options.set_transport(wire);
    options
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<TransportEvent>,
    pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
    connect_timeout: Duration,
    shutdown: CancellationToken,
) {
    let handshake = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("ConnAck received: {:?}", ack.code);
                    return Ok(());
                }
                Ok(other) => debug!("Event before ConnAck: {:?}", other),
                Err(e) => return Err(e.to_string()),
            }
        }
    };

    let outcome = tokio::select! {
        _ = shutdown.cancelled() => return,
        outcome = tokio::time::timeout(connect_timeout, handshake) => outcome,
    };

    match outcome {
        Ok(Ok(())) => {
            info!("Connected to MQTT broker");
            let _ = events.send(TransportEvent::Connected);
        }
        Ok(Err(reason)) => {
            error!("MQTT connect failed: {}", reason);
            let _ = events.send(TransportEvent::ConnectFailed(reason));
            return;
        }
        Err(_) => {
            let reason = format!("Connect timed out after {}s", connect_timeout.as_secs());
            error!("MQTT connect failed: {}", reason);
            let _ = events.send(TransportEvent::ConnectFailed(reason));
            return;
        }
    }

    let mut in_flight: HashMap<u16, String> = HashMap::new();

    loop {
        let polled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Poller shut down");
                return;
            }
            polled = event_loop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = MessageEvent::from_topic(publish.topic, publish.payload.to_vec());
                debug!("MQTT msg: {}", message);
                if events.send(TransportEvent::Message(message)).is_err() {
                    warn!("Event receiver dropped, stopping poller");
                    return;
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                let topic = pending_subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();
                match topic {
                    Some(topic) => {
                        in_flight.insert(pkid, topic);
                    }
                    None => warn!("SUBSCRIBE {} sent without a pending topic", pkid),
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => match in_flight.remove(&ack.pkid) {
                Some(topic) => {
                    let granted = !ack.return_codes.is_empty()
                        && ack
                            .return_codes
                            .iter()
                            .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                    let _ = events.send(TransportEvent::Subscribed { topic, granted });
                }
                None => warn!("SubAck for unknown packet id {}", ack.pkid),
            },
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = events.send(TransportEvent::ConnectionLost(
                    "Broker closed the session".to_string(),
                ));
                return;
            }
            Ok(other) => debug!("MQTT event: {:?}", other),
            Err(e) => {
                warn!("MQTT connection lost: {}", e);
                let _ = events.send(TransportEvent::ConnectionLost(e.to_string()));
                return;
            }
        }
    }
}

/// rumqttc-backed [`Transport`]
pub struct MqttTransport {
    config: BrokerConfig,
    session: Option<MqttSession<Running>>,
}

impl MqttTransport {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    fn session(&self) -> Result<&MqttSession<Running>, TransportError> {
        self.session.as_ref().ok_or(TransportError::NotRunning)
    }
}

impl Transport for MqttTransport {
    fn connect(
        &mut self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.disconnect();

        let endpoint = BrokerEndpoint::resolve(&self.config);
        info!(
            "Connecting to MQTT broker {} as {} ({})",
            endpoint.broker_addr(),
            endpoint.client_id,
            if endpoint.secure { "secure" } else { "insecure" }
        );

        self.session = Some(MqttSession::configure(endpoint).start(events));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.session()?.subscribe(topic)
    }

    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.session()?.publish(topic, payload)
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Connect,
        Subscribe(String),
        Publish(String, Vec<u8>),
        Disconnect,
    }

    /// Transport that records every request and lets tests inject events
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        calls: Arc<Mutex<Vec<Call>>>,
        events: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
        refuse_connect: bool,
    }

    impl RecordingTransport {
        pub fn refusing_connect() -> Self {
            Self {
                refuse_connect: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn publishes(&self) -> Vec<(String, Vec<u8>)> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Publish(topic, payload) => Some((topic, payload)),
                    _ => None,
                })
                .collect()
        }

        pub fn subscriptions(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::Subscribe(topic) => Some(topic),
                    _ => None,
                })
                .collect()
        }

        pub fn emit(&self, event: TransportEvent) {
            let guard = self.events.lock().unwrap();
            guard
                .as_ref()
                .expect("connect was never called")
                .send(event)
                .expect("engine dropped the transport receiver");
        }
    }

    impl Transport for RecordingTransport {
        fn connect(
            &mut self,
            events: mpsc::UnboundedSender<TransportEvent>,
        ) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push(Call::Connect);
            if self.refuse_connect {
                return Err(TransportError::Connect("refused by test".to_string()));
            }
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Subscribe(topic.to_string()));
            Ok(())
        }

        fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Publish(topic.to_string(), payload));
            Ok(())
        }

        fn disconnect(&mut self) {
            self.calls.lock().unwrap().push(Call::Disconnect);
        }
    }
}
