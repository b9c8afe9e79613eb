//! Session state and the status side channel
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Authenticating ──► Subscribed ──► Receiving
//!                      ▲               │                 │             │
//!                      │               └─────────────────┴─────────────┤
//!                      │                                               ▼
//!                      └────────────────────────────────────────── Reconnecting
//!
//!              any state ──► Stopped (shutdown, fatal error, reconnect disabled)
//! ```
//!
//! `Connecting` lasts while a link is opened. [`Link::handshake`] dials the
//! transport and runs the CONNECT exchange as one step (rumqttc offers no way
//! to split them), so the TCP connect itself is reported as `Authenticating`.
//!
//! [`Link::handshake`]: super::link::Link::handshake

use chrono::{DateTime, Local};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::config::{BrokerAddress, Credentials, MqttConfig, ProtocolVersion, ReconnectPolicy};
use crate::error::ClientError;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribed,
    Receiving,
    Reconnecting,
    Stopped,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Disconnected, Connecting)
            | (Connecting, Authenticating)
            | (Authenticating, Subscribed)
            | (Subscribed, Receiving)
            | (Reconnecting, Connecting) => true,
            (Connecting | Authenticating | Subscribed | Receiving, Reconnecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Snapshot published on every state change and every delivered message
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub messages_received: usize,
    pub decode_warnings: usize,
    pub codes_extracted: usize,
    pub reconnect_attempts: u32,
    pub last_activity: Option<DateTime<Local>>,
    pub last_error: Option<String>,
}

/// One logical connection lifetime, owned by the connection manager
///
/// Spans reconnects: the network link is replaced on every attempt, the
/// session is not.
pub struct Session {
    broker: BrokerAddress,
    credentials: Credentials,
    protocol: ProtocolVersion,
    filters: Vec<String>,
    reconnect: ReconnectPolicy,
    state: ConnectionState,
    /// Consecutive reconnects since the last time `Receiving` was reached
    failed_attempts: u32,
    status: watch::Sender<ClientStatus>,
}

impl Session {
    pub fn new(
        config: &MqttConfig,
        credentials: Credentials,
        status: watch::Sender<ClientStatus>,
    ) -> Self {
        Self {
            broker: config.broker.clone(),
            credentials,
            protocol: config.protocol,
            filters: config.topics.clone(),
            reconnect: config.reconnect,
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
            status,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn broker(&self) -> &BrokerAddress {
        &self.broker
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Moves to `next` and publishes the change
    ///
    /// Illegal transitions are refused and logged; the state is unchanged.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            error!("Refusing state transition {} -> {}", self.state, next);
            return false;
        }
        debug!("Session {}: {} -> {}", self.broker, self.state, next);
        self.state = next;
        if next == ConnectionState::Receiving {
            self.failed_attempts = 0;
        }
        self.status.send_modify(|status| status.state = next);
        true
    }

    /// Registers a failed attempt and decides whether to try again
    ///
    /// On `Some(delay)` the session is `Reconnecting` and the caller must wait
    /// `delay` before connecting; on `None` the caller must stop.
    pub fn schedule_retry(&mut self, cause: &ClientError) -> Option<Duration> {
        self.status
            .send_modify(|status| status.last_error = Some(cause.to_string()));

        if !cause.is_retryable() {
            return None;
        }
        let attempt = self.failed_attempts + 1;
        if !self.reconnect.allows(attempt) {
            return None;
        }

        self.failed_attempts = attempt;
        self.transition(ConnectionState::Reconnecting);
        self.status
            .send_modify(|status| status.reconnect_attempts += 1);
        info!(
            "Reconnecting to {} in {:.1}s (attempt {})",
            self.broker,
            self.reconnect.delay.as_secs_f64(),
            attempt
        );
        Some(self.reconnect.delay)
    }

    pub fn record_message(&mut self, decode_warning: bool, code_extracted: bool) {
        self.status.send_modify(|status| {
            status.messages_received += 1;
            if decode_warning {
                status.decode_warnings += 1;
            }
            if code_extracted {
                status.codes_extracted += 1;
            }
            status.last_activity = Some(Local::now());
        });
    }

    pub fn stop(&mut self) {
        if self.state != ConnectionState::Stopped {
            self.transition(ConnectionState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn session(delay: f64, max_attempts: Option<u32>) -> (Session, watch::Receiver<ClientStatus>) {
        let mut config = MqttConfig::new("broker.local", 1883);
        config.reconnect = ReconnectPolicy::from_secs_f64(delay, max_attempts);
        let (tx, rx) = watch::channel(ClientStatus::default());
        (Session::new(&config, Credentials::new("u", "p"), tx), rx)
    }

    #[test]
    fn happy_path_transitions() {
        let (mut session, status) = session(5.0, None);
        for next in [Connecting, Authenticating, Subscribed, Receiving] {
            assert!(session.transition(next));
        }
        assert_eq!(status.borrow().state, Receiving);
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let (mut session, _status) = session(5.0, None);
        assert!(!session.transition(Receiving));
        assert_eq!(session.state(), Disconnected);

        session.stop();
        assert!(!session.transition(Connecting));
        assert_eq!(session.state(), Stopped);
    }

    #[test]
    fn transport_errors_schedule_retry() {
        let (mut session, status) = session(2.0, None);
        session.transition(Connecting);
        let delay = session.schedule_retry(&ClientError::Transport("refused".into()));
        assert_eq!(delay, Some(Duration::from_secs(2)));
        assert_eq!(session.state(), Reconnecting);
        assert_eq!(status.borrow().reconnect_attempts, 1);
        assert_eq!(status.borrow().last_error.as_deref(), Some("Transport error: refused"));
    }

    #[test]
    fn auth_errors_never_retry() {
        let (mut session, _status) = session(2.0, None);
        session.transition(Connecting);
        assert_eq!(session.schedule_retry(&ClientError::Auth("bad".into())), None);
        assert_eq!(session.state(), Connecting);
    }

    #[test]
    fn disabled_policy_never_retries() {
        let (mut session, _status) = session(0.0, None);
        session.transition(Connecting);
        assert_eq!(session.schedule_retry(&ClientError::Transport("x".into())), None);
    }

    #[test]
    fn attempt_bound_resets_once_receiving() {
        let (mut session, _status) = session(1.0, Some(1));
        let err = ClientError::Transport("x".into());

        session.transition(Connecting);
        assert!(session.schedule_retry(&err).is_some());
        session.transition(Connecting);
        assert!(session.schedule_retry(&err).is_none());

        let (mut session, _status) = self::session(1.0, Some(1));
        session.transition(Connecting);
        assert!(session.schedule_retry(&err).is_some());
        for next in [Connecting, Authenticating, Subscribed, Receiving] {
            session.transition(next);
        }
        assert!(session.schedule_retry(&err).is_some());
    }

    #[test]
    fn message_counters_accumulate() {
        let (mut session, status) = session(1.0, None);
        session.record_message(false, true);
        session.record_message(true, false);
        let status = status.borrow();
        assert_eq!(status.messages_received, 2);
        assert_eq!(status.decode_warnings, 1);
        assert_eq!(status.codes_extracted, 1);
        assert!(status.last_activity.is_some());
    }
}
