//! # MQTT Client
//!
//! Subscribes to the broker the phone-side forwarder publishes to and keeps
//! that subscription alive across network failures.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - broker, credentials, topics and reconnect policy
//! ├── link.rs             - Connector/Link seam and the rumqttc implementation
//! ├── message_manager.rs  - payload decoding into inbound messages
//! ├── mqtt_handler.rs     - connection manager and receive loop
//! └── session.rs          - state machine and status snapshots
//! ```
//!
//! Authentication and protocol refusals stop the client immediately; only
//! transport failures are retried, with a fixed delay.

pub mod config;
pub mod link;
pub mod message_manager;
pub mod mqtt_handler;
pub mod session;

pub use config::{Credentials, MqttConfig, ReconnectPolicy};
pub use link::{Connector, Link, RumqttConnector};
pub use message_manager::{DecoderOptions, InboundMessage, PayloadDecoder, RawPublish};
pub use mqtt_handler::{MqttHandle, MqttHandler};
pub use session::{ClientStatus, ConnectionState};
