//! Connection manager: session lifecycle and the receive loop
//!
//! One task owns the [`Session`] and the live [`Link`]. Messages are decoded,
//! inspected for verification codes and handed to the [`Sink`] strictly in
//! the order the broker delivered them; nothing is processed concurrently.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::link::{Connector, Link};
use super::message_manager::{Decoded, PayloadDecoder, RawPublish};
use super::session::{ClientStatus, ConnectionState, Session};
use crate::error::ClientError;
use crate::notify::{Delivery, Sink};
use crate::runtime::IoContext;
use crate::sms::{extract_first, ExtractionResult, MessageContent};

pub struct MqttHandler<C: Connector, S: Sink> {
    io: IoContext,
    config: MqttConfig,
    connector: C,
    sink: S,
    decoder: PayloadDecoder,
    status_tx: watch::Sender<ClientStatus>,
    status_rx: watch::Receiver<ClientStatus>,
}

impl<C, S> MqttHandler<C, S>
where
    C: Connector,
    S: Sink,
{
    /// The I/O context must already be initialised; no socket is touched here
    pub fn new(
        io: &IoContext,
        config: MqttConfig,
        connector: C,
        sink: S,
        decoder: PayloadDecoder,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        Self {
            io: io.clone(),
            config,
            connector,
            sink,
            decoder,
            status_tx,
            status_rx,
        }
    }

    pub fn status(&self) -> watch::Receiver<ClientStatus> {
        self.status_rx.clone()
    }

    /// Runs the client until shutdown or a terminal error
    ///
    /// Returns `Ok` when stopped through `shutdown`. Every other exit is an
    /// error that reconnecting could not (or was not allowed to) fix.
    pub async fn start(mut self, shutdown: CancellationToken) -> Result<(), ClientError> {
        let credentials = match self.config.validate() {
            Ok(credentials) => credentials.clone(),
            Err(e) => {
                error!("Refusing to start: {}", e);
                self.status_tx.send_modify(|status| {
                    status.state = ConnectionState::Stopped;
                    status.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let mut session = Session::new(&self.config, credentials, self.status_tx.clone());
        info!(
            "Starting {} session with {} as {}",
            session.protocol(),
            session.broker(),
            session.credentials().username
        );
        session.transition(ConnectionState::Connecting);

        loop {
            let cause = if shutdown.is_cancelled() {
                ClientError::Shutdown
            } else {
                self.run_once(&mut session, &shutdown).await
            };

            if matches!(cause, ClientError::Shutdown) {
                info!("Shutdown requested, stopping session with {}", session.broker());
                session.stop();
                return Ok(());
            }
            warn!("Session with {} ended: {}", session.broker(), cause);

            let Some(delay) = session.schedule_retry(&cause) else {
                session.stop();
                if cause.is_retryable() {
                    error!("Reconnect disabled or exhausted, giving up on {}", session.broker());
                }
                return Err(cause);
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested during reconnect delay");
                    session.stop();
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
            session.transition(ConnectionState::Connecting);
        }
    }

    /// Starts [`Self::start`] on the I/O context
    pub fn spawn(self, shutdown: CancellationToken) -> MqttHandle
    where
        C: 'static,
        C::Link: 'static,
        S: 'static,
    {
        let status = self.status();
        let io = self.io.clone();
        let task = io.handle().spawn(self.start(shutdown.clone()));
        MqttHandle {
            shutdown,
            status,
            task,
        }
    }

    /// One connection attempt, from open to the error that ended it
    ///
    /// The link is closed before returning, whatever the outcome.
    async fn run_once(
        &mut self,
        session: &mut Session,
        shutdown: &CancellationToken,
    ) -> ClientError {
        let mut link = match self.connector.open(&self.config, session.credentials()).await {
            Ok(link) => link,
            Err(e) => return e,
        };
        let cause = self.drive(&mut link, session, shutdown).await;
        link.close().await;
        cause
    }

    async fn drive(
        &mut self,
        link: &mut C::Link,
        session: &mut Session,
        shutdown: &CancellationToken,
    ) -> ClientError {
        // the handshake includes the dial, see the session state docs
        session.transition(ConnectionState::Authenticating);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return ClientError::Shutdown,
            result = link.handshake() => {
                if let Err(e) = result {
                    return e;
                }
            }
        }
        info!("Connected to {}", session.broker());

        let qos = self.config.qos;
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return ClientError::Shutdown,
            result = link.subscribe(session.filters(), qos) => match result {
                Ok(accepted) => accepted,
                Err(e) => return e,
            }
        };
        if accepted.is_empty() {
            return ClientError::Protocol(format!(
                "broker rejected every topic filter: {}",
                session.filters().join(", ")
            ));
        }
        session.transition(ConnectionState::Subscribed);
        session.transition(ConnectionState::Receiving);
        debug!("Receiving on {} filter(s) at {:?}", accepted.len(), qos);

        loop {
            let publish = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return ClientError::Shutdown,
                result = link.recv() => match result {
                    Ok(publish) => publish,
                    Err(e) => return e,
                }
            };
            self.deliver(session, publish).await;
        }
    }

    async fn deliver(&mut self, session: &mut Session, publish: RawPublish) {
        let Decoded { message, warning } = self.decoder.decode(publish);
        let content = MessageContent::from_message(&message);
        let code = extract_first(content.snippets()).map(ExtractionResult::into_owned);
        session.record_message(warning.is_some(), code.is_some());

        self.sink
            .notify(Delivery {
                message: &message,
                content: &content,
                code: code.as_ref(),
            })
            .await;
    }
}

/// Handle to a spawned connection manager
pub struct MqttHandle {
    shutdown: CancellationToken,
    status: watch::Receiver<ClientStatus>,
    task: JoinHandle<Result<(), ClientError>>,
}

impl MqttHandle {
    pub fn status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Waits for the manager to finish on its own
    pub async fn join(self) -> Result<(), ClientError> {
        self.task
            .await
            .map_err(|e| ClientError::Task(e.to_string()))?
    }

    /// Cancels the manager and waits until its session is released
    pub async fn stop(self) -> Result<(), ClientError> {
        self.shutdown.cancel();
        self.join().await
    }
}
