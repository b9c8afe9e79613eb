//! Error taxonomy for the relay client
//!
//! Only [`ClientError::Transport`] is recovered by reconnecting. Every other
//! variant ends the session and is reported to the caller. Degraded payloads
//! and missing desktop capabilities are not errors at all; they surface as
//! [`DecodeWarning`] and [`CapabilityWarning`] log records.

use std::fmt;

/// Errors that end (or interrupt) a client session
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Missing or invalid startup parameters. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The broker refused the supplied credentials. Never retried.
    #[error("Authentication rejected by broker: {0}")]
    Auth(String),

    /// The broker refused the protocol version, client id or a subscription.
    /// Never retried.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Socket or network failure. Retried according to the reconnect policy.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A desktop capability could not be initialised
    #[error("Capability error: {0}")]
    Capability(String),

    /// The connection task ended without reporting a result
    #[error("Connection task failed: {0}")]
    Task(String),

    /// The session was cancelled while waiting
    #[error("Shutdown requested")]
    Shutdown,
}

impl ClientError {
    /// Whether a reconnect may fix this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<rumqttc::ConnectionError> for ClientError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        use rumqttc::{ConnectReturnCode, ConnectionError};

        match err {
            ConnectionError::ConnectionRefused(code) => match code {
                ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
                    ClientError::Auth(format!("{:?}", code))
                }
                ConnectReturnCode::RefusedProtocolVersion | ConnectReturnCode::BadClientId => {
                    ClientError::Protocol(format!("{:?}", code))
                }
                // busy broker, try again later
                ConnectReturnCode::ServiceUnavailable => {
                    ClientError::Transport(format!("{:?}", code))
                }
                ConnectReturnCode::Success => {
                    ClientError::Protocol("refused with success code".to_string())
                }
            },
            ConnectionError::NotConnAck(packet) => {
                ClientError::Protocol(format!("expected CONNACK, got {:?}", packet))
            }
            other => ClientError::Transport(other.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for ClientError {
    fn from(err: rumqttc::ClientError) -> Self {
        // request queue closed: the event loop is gone
        ClientError::Transport(err.to_string())
    }
}

/// A payload that could not be rendered as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub topic: String,
    pub payload_len: usize,
    pub reason: String,
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "payload on {} ({} bytes) is not valid UTF-8: {}",
            self.topic, self.payload_len, self.reason
        )
    }
}

/// An optional desktop feature that is not available on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityWarning {
    pub capability: &'static str,
    pub reason: String,
}

impl fmt::Display for CapabilityWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} unavailable: {}", self.capability, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnectReturnCode, ConnectionError};

    #[test]
    fn only_transport_is_retryable() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(!ClientError::Config("x".into()).is_retryable());
        assert!(!ClientError::Auth("x".into()).is_retryable());
        assert!(!ClientError::Protocol("x".into()).is_retryable());
        assert!(!ClientError::Shutdown.is_retryable());
    }

    #[test]
    fn refused_connack_codes_map_to_taxonomy() {
        let auth: ClientError =
            ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword).into();
        assert!(matches!(auth, ClientError::Auth(_)));

        let not_authorized: ClientError =
            ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized).into();
        assert!(matches!(not_authorized, ClientError::Auth(_)));

        let protocol: ClientError =
            ConnectionError::ConnectionRefused(ConnectReturnCode::RefusedProtocolVersion).into();
        assert!(matches!(protocol, ClientError::Protocol(_)));

        let busy: ClientError =
            ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable).into();
        assert!(busy.is_retryable());
    }

    #[test]
    fn io_failures_are_transport_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: ClientError = ConnectionError::Io(io).into();
        assert!(err.is_retryable());
    }
}
