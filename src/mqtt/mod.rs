//! # Broker Connection
//!
//! Everything between the engine and the MQTT broker.
//!
//! ```text
//! mqtt/
//! ├── config.rs      - Broker settings and per-connect endpoint resolution
//! ├── message.rs     - Delivered message representation
//! ├── transport.rs   - Transport trait and the rumqttc session state machine
//! └── connection.rs  - Connection state, subscription set and publish gate
//! ```
//!
//! The engine owns a single [`connection::ConnectionManager`]. Transport
//! callbacks arrive as [`transport::TransportEvent`]s on the engine's channel,
//! so connection state is only ever written from the engine task.

pub mod config;
pub mod connection;
pub mod message;
pub mod transport;
