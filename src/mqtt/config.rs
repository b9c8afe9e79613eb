use rumqttc::QoS;
use std::fmt;
use std::time::Duration;

use crate::error::ClientError;

/// Topic filter used when none is configured
pub const DEFAULT_TOPIC: &str = "$SYS/#";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Username and secret for the broker
///
/// The secret never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// MQTT protocol revision requested in CONNECT
///
/// Anything older than 3.1.1 (the `MQIsdp` protocol name) is refused by the
/// broker, so it is not representable here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolVersion {
    #[default]
    V311,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVersion::V311 => write!(f, "MQTT 3.1.1"),
        }
    }
}

/// When and how often to retry a dropped connection
///
/// A zero delay disables reconnecting altogether: the first transport failure
/// stops the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Upper bound on consecutive reconnect attempts, unbounded when `None`
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Builds a policy from a delay in seconds; values `<= 0` (or NaN) disable it
    ///
    /// Delays too large for a [`Duration`] saturate to [`Duration::MAX`].
    pub fn from_secs_f64(delay: f64, max_attempts: Option<u32>) -> Self {
        let delay = if delay > 0.0 {
            Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        Self {
            delay,
            max_attempts,
        }
    }

    pub fn disabled() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    /// Whether reconnect number `attempt` (1-based) is allowed
    pub fn allows(&self, attempt: u32) -> bool {
        self.is_enabled() && self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }
}

/// Everything the connection manager needs to open a session
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker: BrokerAddress,
    pub credentials: Option<Credentials>,
    pub protocol: ProtocolVersion,
    pub topics: Vec<String>,
    pub qos: QoS,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            broker: BrokerAddress {
                host: host.into(),
                port,
            },
            credentials: None,
            protocol: ProtocolVersion::default(),
            topics: vec![DEFAULT_TOPIC.to_string()],
            qos: QoS::AtLeastOnce,
            client_id: default_client_id(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Checks the parameters that must hold before any socket is opened
    ///
    /// Returns the credentials so callers do not have to unwrap them again.
    pub fn validate(&self) -> Result<&Credentials, ClientError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ClientError::Config("missing credentials: set MQTT_USERNAME and MQTT_PASSWORD".into())
        })?;
        if credentials.username.is_empty() {
            return Err(ClientError::Config("username must not be empty".into()));
        }
        if credentials.secret().is_empty() {
            return Err(ClientError::Config("password must not be empty".into()));
        }
        if self.broker.host.is_empty() {
            return Err(ClientError::Config("broker host must not be empty".into()));
        }
        if self.broker.port == 0 {
            return Err(ClientError::Config("broker port must not be 0".into()));
        }
        if self.topics.is_empty() {
            return Err(ClientError::Config("at least one topic filter is required".into()));
        }
        if self.client_id.is_empty() {
            return Err(ClientError::Config("client id must not be empty".into()));
        }
        // rumqttc panics on keep-alive below 5 seconds
        if self.keep_alive < Duration::from_secs(5) {
            return Err(ClientError::Config(
                "keepalive must be at least 5 seconds".into(),
            ));
        }
        Ok(credentials)
    }
}

pub fn default_client_id() -> String {
    format!("sms-relay-{}", std::process::id())
}

/// Splits comma-separated entries, trims them and drops duplicates
///
/// Order of first appearance is kept. An empty result falls back to
/// [`DEFAULT_TOPIC`].
pub fn parse_topics<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for entry in raw {
        for topic in entry.as_ref().split(',') {
            let topic = topic.trim();
            if !topic.is_empty() && !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
    }

    if topics.is_empty() {
        topics.push(DEFAULT_TOPIC.to_string());
    }
    topics
}

pub fn qos_from_u8(level: u8) -> Result<QoS, ClientError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ClientError::Config(format!(
            "invalid QoS level {} (expected 0, 1 or 2)",
            other
        ))),
    }
}
