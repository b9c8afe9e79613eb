//! End-to-end runs of the connection manager against a scripted broker link

use async_trait::async_trait;
use rumqttc::QoS;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use sms_relay::error::ClientError;
use sms_relay::mqtt::message_manager::PayloadMode;
use sms_relay::mqtt::{
    ClientStatus, ConnectionState, Connector, Credentials, Link, MqttConfig, MqttHandler,
    PayloadDecoder, RawPublish, ReconnectPolicy,
};
use sms_relay::notify::{Delivery, Sink};
use sms_relay::runtime::IoContext;

enum Step {
    Publish(RawPublish),
    Fail(ClientError),
}

/// What one connection attempt does
#[derive(Default)]
struct Script {
    handshake: Option<ClientError>,
    /// Filters the broker accepts; everything when `None`
    accepted: Option<Vec<String>>,
    steps: Vec<Step>,
}

impl Script {
    fn publishing(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Record {
    opens: Vec<Instant>,
    closed: usize,
}

#[derive(Clone, Default)]
struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            record: Arc::default(),
        }
    }

    fn opens(&self) -> Vec<Instant> {
        self.record.lock().unwrap().opens.clone()
    }

    fn closed(&self) -> usize {
        self.record.lock().unwrap().closed
    }
}

struct ScriptedLink {
    script: Script,
    record: Arc<Mutex<Record>>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Link = ScriptedLink;

    async fn open(
        &mut self,
        _config: &MqttConfig,
        _credentials: &Credentials,
    ) -> Result<Self::Link, ClientError> {
        self.record.lock().unwrap().opens.push(Instant::now());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(ScriptedLink {
            script,
            record: self.record.clone(),
        })
    }
}

#[async_trait]
impl Link for ScriptedLink {
    async fn handshake(&mut self) -> Result<(), ClientError> {
        match self.script.handshake.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &mut self,
        filters: &[String],
        _qos: QoS,
    ) -> Result<Vec<String>, ClientError> {
        Ok(self
            .script
            .accepted
            .clone()
            .unwrap_or_else(|| filters.to_vec()))
    }

    async fn recv(&mut self) -> Result<RawPublish, ClientError> {
        if self.script.steps.is_empty() {
            // idle broker
            std::future::pending::<()>().await;
        }
        match self.script.steps.remove(0) {
            Step::Publish(publish) => Ok(publish),
            Step::Fail(e) => Err(e),
        }
    }

    async fn close(self) {
        self.record.lock().unwrap().closed += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    topic: String,
    text: String,
    mode: PayloadMode,
    code: Option<String>,
}

#[derive(Clone, Default)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl RecordingSink {
    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn notify(&mut self, delivery: Delivery<'_>) {
        self.seen.lock().unwrap().push(Seen {
            topic: delivery.message.topic().to_string(),
            text: delivery.message.payload().text().to_string(),
            mode: delivery.message.payload().mode(),
            code: delivery.code.map(|code| code.code.clone()),
        });
    }
}

fn config(delay_secs: f64) -> MqttConfig {
    let mut config = MqttConfig::new("broker.test", 1883);
    config.credentials = Some(Credentials::new("phone", "hunter2"));
    config.topics = vec!["sms/inbox".to_string()];
    config.reconnect = ReconnectPolicy::from_secs_f64(delay_secs, None);
    config
}

fn publish(topic: &str, payload: &[u8]) -> Step {
    Step::Publish(RawPublish::new(topic, payload.to_vec()))
}

fn transport_drop() -> Step {
    Step::Fail(ClientError::Transport("connection reset".into()))
}

fn handler(
    config: MqttConfig,
    connector: &ScriptedConnector,
    sink: &RecordingSink,
) -> MqttHandler<ScriptedConnector, RecordingSink> {
    let io = IoContext::current().unwrap();
    MqttHandler::new(
        &io,
        config,
        connector.clone(),
        sink.clone(),
        PayloadDecoder::default(),
    )
}

async fn wait_until<F>(status: &mut tokio::sync::watch::Receiver<ClientStatus>, condition: F)
where
    F: FnMut(&ClientStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(30), status.wait_for(condition))
        .await
        .expect("condition not reached")
        .expect("status channel closed");
}

#[tokio::test]
async fn messages_reach_the_sink_in_arrival_order() {
    let connector = ScriptedConnector::new(vec![Script::publishing(vec![
        publish("sms/inbox", b"P1"),
        publish("sms/inbox", b"P2"),
        publish("sms/inbox", b"P3"),
    ])]);
    let sink = RecordingSink::default();
    let handler = handler(config(5.0), &connector, &sink);
    let mut status = handler.status();

    let handle = handler.spawn(CancellationToken::new());
    wait_until(&mut status, |s| s.messages_received == 3).await;
    handle.stop().await.unwrap();

    let texts: Vec<String> = sink.seen().into_iter().map(|seen| seen.text).collect();
    assert_eq!(texts, vec!["P1", "P2", "P3"]);
    assert_eq!(status.borrow().state, ConnectionState::Stopped);
    assert_eq!(connector.closed(), 1);
}

#[tokio::test]
async fn verification_code_is_extracted_for_the_sink() {
    let connector = ScriptedConnector::new(vec![Script::publishing(vec![
        publish("sms/inbox", "您的验证码是583920，请勿告诉他人".as_bytes()),
        publish("sms/inbox", "请拨打10086查询话费".as_bytes()),
        publish(
            "sms/inbox",
            r#"{"msg":"Your verification code is 771204","from":"+4912345"}"#.as_bytes(),
        ),
    ])]);
    let sink = RecordingSink::default();
    let handler = handler(config(5.0), &connector, &sink);
    let mut status = handler.status();

    let handle = handler.spawn(CancellationToken::new());
    wait_until(&mut status, |s| s.messages_received == 3).await;
    handle.stop().await.unwrap();

    let codes: Vec<Option<String>> = sink.seen().into_iter().map(|seen| seen.code).collect();
    assert_eq!(
        codes,
        vec![Some("583920".to_string()), None, Some("771204".to_string())]
    );
    assert_eq!(status.borrow().codes_extracted, 2);
}

#[tokio::test]
async fn invalid_utf8_is_delivered_as_hex_and_the_loop_continues() {
    let connector = ScriptedConnector::new(vec![Script::publishing(vec![
        publish("sms/inbox", b"\xff\xfe"),
        publish("sms/inbox", "验证码 4821".as_bytes()),
    ])]);
    let sink = RecordingSink::default();
    let handler = handler(config(5.0), &connector, &sink);
    let mut status = handler.status();

    let handle = handler.spawn(CancellationToken::new());
    wait_until(&mut status, |s| s.messages_received == 2).await;
    handle.stop().await.unwrap();

    let seen = sink.seen();
    assert_eq!(
        seen[0],
        Seen {
            topic: "sms/inbox".into(),
            text: "fffe".into(),
            mode: PayloadMode::Hex,
            code: None,
        }
    );
    assert_eq!(seen[1].code.as_deref(), Some("4821"));
    assert_eq!(status.borrow().decode_warnings, 1);
}

#[tokio::test]
async fn zero_delay_stops_after_the_first_disconnect() {
    let connector = ScriptedConnector::new(vec![Script::publishing(vec![transport_drop()])]);
    let sink = RecordingSink::default();
    let handler = handler(config(0.0), &connector, &sink);
    let status = handler.status();

    let result = handler.start(CancellationToken::new()).await;

    assert!(matches!(result, Err(ClientError::Transport(_))));
    assert_eq!(connector.opens().len(), 1);
    assert_eq!(connector.closed(), 1);
    assert_eq!(status.borrow().state, ConnectionState::Stopped);
    assert_eq!(status.borrow().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_waits_for_the_configured_delay() {
    let connector = ScriptedConnector::new(vec![
        Script::publishing(vec![publish("sms/inbox", b"before"), transport_drop()]),
        Script::publishing(vec![publish("sms/inbox", b"after")]),
    ]);
    let sink = RecordingSink::default();
    let handler = handler(config(2.0), &connector, &sink);
    let mut status = handler.status();

    let handle = handler.spawn(CancellationToken::new());
    wait_until(&mut status, |s| s.messages_received == 2).await;
    handle.stop().await.unwrap();

    let opens = connector.opens();
    assert_eq!(opens.len(), 2);
    assert!(opens[1] - opens[0] >= Duration::from_secs(2));

    let texts: Vec<String> = sink.seen().into_iter().map(|seen| seen.text).collect();
    assert_eq!(texts, vec!["before", "after"]);
    assert_eq!(status.borrow().reconnect_attempts, 1);
    assert_eq!(connector.closed(), 2);
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let connector = ScriptedConnector::new(vec![Script {
        handshake: Some(ClientError::Auth("BadUserNamePassword".into())),
        ..Script::default()
    }]);
    let sink = RecordingSink::default();
    let handler = handler(config(1.0), &connector, &sink);
    let status = handler.status();

    let result = handler.start(CancellationToken::new()).await;

    assert!(matches!(result, Err(ClientError::Auth(_))));
    assert_eq!(connector.opens().len(), 1);
    assert_eq!(connector.closed(), 1);
    assert_eq!(status.borrow().state, ConnectionState::Stopped);
}

#[tokio::test]
async fn rejected_subscriptions_are_a_protocol_error() {
    let connector = ScriptedConnector::new(vec![Script {
        accepted: Some(Vec::new()),
        ..Script::default()
    }]);
    let sink = RecordingSink::default();
    let handler = handler(config(1.0), &connector, &sink);

    let result = handler.start(CancellationToken::new()).await;

    assert!(matches!(result, Err(ClientError::Protocol(_))));
    assert_eq!(connector.opens().len(), 1);
}

#[tokio::test]
async fn missing_credentials_fail_before_connecting() {
    let connector = ScriptedConnector::new(Vec::new());
    let sink = RecordingSink::default();
    let mut config = config(1.0);
    config.credentials = None;
    let handler = handler(config, &connector, &sink);
    let status = handler.status();

    let result = handler.start(CancellationToken::new()).await;

    assert!(matches!(result, Err(ClientError::Config(_))));
    assert!(connector.opens().is_empty());
    assert_eq!(status.borrow().state, ConnectionState::Stopped);
}

#[tokio::test]
async fn shutdown_interrupts_the_reconnect_delay() {
    let connector = ScriptedConnector::new(vec![Script::publishing(vec![transport_drop()])]);
    let sink = RecordingSink::default();
    let handler = handler(config(3600.0), &connector, &sink);
    let mut status = handler.status();

    let handle = handler.spawn(CancellationToken::new());
    wait_until(&mut status, |s| s.state == ConnectionState::Reconnecting).await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), handle.stop()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert_eq!(connector.opens().len(), 1);
    assert_eq!(connector.closed(), 1);
    assert_eq!(status.borrow().state, ConnectionState::Stopped);
}

#[tokio::test]
async fn cancelled_token_stops_before_connecting() {
    let connector = ScriptedConnector::new(Vec::new());
    let sink = RecordingSink::default();
    let handler = handler(config(1.0), &connector, &sink);

    let token = CancellationToken::new();
    token.cancel();
    assert!(handler.start(token).await.is_ok());
    assert!(connector.opens().is_empty());
}
