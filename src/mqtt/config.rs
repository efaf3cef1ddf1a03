use rand::{distr::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Length of the random suffix appended to the client id prefix
const CLIENT_ID_SUFFIX_LEN: usize = 6;

/// Largest MQTT packet accepted or sent; voice clips travel as single publishes
pub const DEFAULT_MAX_PACKET_BYTES: usize = 8 * 1024 * 1024;

/// Wire transport used to reach the broker
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// MQTT over WebSocket (`ws://` or `wss://`), what the doorbell's broker listens on
    #[default]
    Websocket,
    /// Plain MQTT over TCP, TLS when `secure` is set
    Tcp,
}

/// Broker settings as stored in the config file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub secure: bool,
    pub insecure_port: u16,
    pub secure_port: u16,
    pub path: String,
    pub transport: TransportKind,
    pub client_prefix: String,
    pub connect_timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub max_packet_bytes: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            secure: false,
            insecure_port: 9001,
            secure_port: 9002,
            path: "/mqtt".to_string(),
            transport: TransportKind::Websocket,
            client_prefix: "doorbell_".to_string(),
            connect_timeout_secs: 5,
            keep_alive_secs: 30,
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
        }
    }
}

/// Fully resolved connection target for one connect attempt.
///
/// Resolved anew for every connect cycle, each time with a fresh client id.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
    pub kind: TransportKind,
    pub client_id: String,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub max_packet_size: usize,
}

impl BrokerEndpoint {
    pub fn resolve(config: &BrokerConfig) -> Self {
        let port = if config.secure {
            config.secure_port
        } else {
            config.insecure_port
        };
        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };

        Self {
            host: config.host.clone(),
            port,
            path,
            secure: config.secure,
            kind: config.transport,
            client_id: client_id(&config.client_prefix),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            keep_alive: Duration::from_secs(config.keep_alive_secs),
            max_packet_size: config.max_packet_bytes,
        }
    }

    /// Broker address in the form rumqttc expects for the chosen transport
    pub fn broker_addr(&self) -> String {
        match self.kind {
            TransportKind::Websocket => {
                let scheme = if self.secure { "wss" } else { "ws" };
                format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
            }
            TransportKind::Tcp => self.host.clone(),
        }
    }
}

fn client_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}
