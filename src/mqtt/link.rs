//! Broker link abstraction and its rumqttc implementation
//!
//! A [`Link`] is one network session: it is opened by a [`Connector`], driven
//! through handshake, subscribe and receive by the connection manager, and
//! closed (or dropped) when the session ends. Dropping a link always releases
//! its socket, so every exit path of the manager frees the session.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeFilter,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::config::{Credentials, MqttConfig};
use super::message_manager::RawPublish;
use crate::error::ClientError;

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 16;

/// Time allowed for the DISCONNECT to be flushed on close
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Opens broker links
#[async_trait]
pub trait Connector: Send {
    type Link: Link;

    /// Creates a link for one session attempt; no I/O happens until handshake
    async fn open(
        &mut self,
        config: &MqttConfig,
        credentials: &Credentials,
    ) -> Result<Self::Link, ClientError>;
}

/// One live broker session
#[async_trait]
pub trait Link: Send {
    /// Connects the transport and waits for the broker's CONNACK
    async fn handshake(&mut self) -> Result<(), ClientError>;

    /// Subscribes to every filter and waits for the SUBACK
    ///
    /// Returns the filters the broker accepted.
    async fn subscribe(
        &mut self,
        filters: &[String],
        qos: QoS,
    ) -> Result<Vec<String>, ClientError>;

    /// Waits for the next publish
    async fn recv(&mut self) -> Result<RawPublish, ClientError>;

    /// Sends DISCONNECT if the session is still up, then releases the transport
    async fn close(self);
}

/// [`Connector`] backed by rumqttc
#[derive(Debug, Default, Clone)]
pub struct RumqttConnector;

#[async_trait]
impl Connector for RumqttConnector {
    type Link = RumqttLink;

    async fn open(
        &mut self,
        config: &MqttConfig,
        credentials: &Credentials,
    ) -> Result<Self::Link, ClientError> {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker.host, config.broker.port);
        options
            .set_credentials(&credentials.username, credentials.secret())
            .set_keep_alive(config.keep_alive)
            .set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        debug!(
            "Opened {} link to {} as {}",
            config.protocol, config.broker, config.client_id
        );

        Ok(RumqttLink {
            client,
            eventloop,
            connect_timeout: config.connect_timeout,
            early: VecDeque::new(),
            live: false,
        })
    }
}

pub struct RumqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    connect_timeout: Duration,
    /// Publishes that arrived while subscribe was still waiting for SUBACKs
    early: VecDeque<RawPublish>,
    /// Set by CONNACK, cleared by any event loop error. rumqttc redials on the
    /// next poll once its network is gone, so a dead link must not be polled.
    live: bool,
}

impl RumqttLink {
    async fn poll(&mut self) -> Result<Event, ClientError> {
        let event = self.eventloop.poll().await;
        if event.is_err() {
            self.live = false;
        }
        event.map_err(ClientError::from)
    }

    async fn await_connack(&mut self) -> Result<(), ClientError> {
        loop {
            match self.poll().await? {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    debug!("CONNACK received (session_present={})", ack.session_present);
                    self.live = true;
                    return Ok(());
                }
                event => debug!("Awaiting CONNACK, got {:?}", event),
            }
        }
    }
}

fn to_raw(publish: rumqttc::Publish) -> RawPublish {
    RawPublish {
        topic: publish.topic,
        payload: publish.payload,
        qos: publish.qos,
        retain: publish.retain,
    }
}

#[async_trait]
impl Link for RumqttLink {
    async fn handshake(&mut self) -> Result<(), ClientError> {
        let connect_timeout = self.connect_timeout;
        match tokio::time::timeout(connect_timeout, self.await_connack()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Transport(format!(
                "no CONNACK within {:?}",
                connect_timeout
            ))),
        }
    }

    async fn subscribe(
        &mut self,
        filters: &[String],
        qos: QoS,
    ) -> Result<Vec<String>, ClientError> {
        // one SUBSCRIBE for every filter; the SUBACK codes follow filter order
        let requests = filters
            .iter()
            .map(|filter| SubscribeFilter::new(filter.clone(), qos));
        self.client.subscribe_many(requests).await?;

        loop {
            match self.poll().await? {
                Event::Incoming(Packet::SubAck(ack)) => {
                    let mut accepted = Vec::new();
                    for (filter, code) in filters.iter().zip(&ack.return_codes) {
                        match code {
                            SubscribeReasonCode::Success(granted) => {
                                info!("Subscribed to {} (granted {:?})", filter, granted);
                                accepted.push(filter.clone());
                            }
                            SubscribeReasonCode::Failure => {
                                warn!("Broker rejected subscription to {}", filter)
                            }
                        }
                    }
                    return Ok(accepted);
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    // retained messages may arrive before the SUBACK
                    debug!("Publish on {} before subscribe completed", publish.topic);
                    self.early.push_back(to_raw(publish));
                }
                event => debug!("Awaiting SUBACK, got {:?}", event),
            }
        }
    }

    async fn recv(&mut self) -> Result<RawPublish, ClientError> {
        if let Some(publish) = self.early.pop_front() {
            return Ok(publish);
        }
        loop {
            match self.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => return Ok(to_raw(publish)),
                Event::Incoming(Packet::Disconnect) => {
                    self.live = false;
                    return Err(ClientError::Transport("broker closed the session".into()));
                }
                event => debug!("Ignoring {:?}", event),
            }
        }
    }

    async fn close(mut self) {
        if !self.live {
            debug!("Link already down, releasing without DISCONNECT");
            return;
        }
        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request not queued: {}", e);
            return;
        }

        let drain = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
            debug!("DISCONNECT not flushed within {:?}", CLOSE_GRACE);
        }
        debug!("Link closed");
    }
}
