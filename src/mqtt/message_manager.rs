//! Inbound message model and payload decoding

use bytes::Bytes;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use rumqttc::QoS;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, warn};

use crate::error::DecodeWarning;

/// How the text form of a payload was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadMode {
    /// Valid UTF-8
    Text,
    /// Invalid sequences replaced with U+FFFD
    Lossy,
    /// Lowercase hex dump of the raw bytes
    Hex,
}

/// What to do with payloads that are not valid UTF-8
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrors {
    /// Fall back to a hex dump
    #[default]
    Strict,
    /// Keep the text, replacing invalid sequences
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Hex-dump every payload regardless of its content
    pub raw_payload: bool,
    pub errors: DecodeErrors,
}

/// A publish as handed over by the broker link, before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawPublish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl RawPublish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    raw: Bytes,
    text: String,
    mode: PayloadMode,
}

impl Payload {
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    /// Whether the text form is a hex dump rather than message text
    pub fn is_hex(&self) -> bool {
        self.mode == PayloadMode::Hex
    }
}

/// One decoded publish. Never mutated after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    topic: String,
    payload: Payload,
    qos: QoS,
    retain: bool,
    received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    /// ISO-8601 timestamp with second precision
    pub fn timestamp(&self, utc: bool) -> String {
        if utc {
            self.received_at
                .with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        } else {
            self.received_at.to_rfc3339_opts(SecondsFormat::Secs, false)
        }
    }

    /// Console line used for every delivered message
    pub fn render(&self, utc: bool) -> String {
        format!(
            "[{}] topic={} qos={} retain={}\n  payload: {}",
            self.timestamp(utc),
            self.topic,
            self.qos as u8,
            if self.retain { "True" } else { "False" },
            self.payload.text
        )
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.text.chars().take(32).collect();
        write!(f, "{} - {}: {}", self.timestamp(false), self.topic, preview)
    }
}

/// Result of decoding one publish
///
/// The warning, when present, has already been logged.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: InboundMessage,
    pub warning: Option<DecodeWarning>,
}

/// Turns raw publishes into [`InboundMessage`]s
///
/// Decoding cannot fail; undecodable payloads degrade to a hex or lossy
/// representation and a [`DecodeWarning`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDecoder {
    options: DecoderOptions,
}

impl PayloadDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    pub fn decode(&self, publish: RawPublish) -> Decoded {
        let RawPublish {
            topic,
            payload,
            qos,
            retain,
        } = publish;

        let (text, mode, warning) = if self.options.raw_payload {
            (hex::encode(&payload), PayloadMode::Hex, None)
        } else {
            match std::str::from_utf8(&payload) {
                Ok(text) => (text.to_string(), PayloadMode::Text, None),
                Err(e) => {
                    let warning = DecodeWarning {
                        topic: topic.clone(),
                        payload_len: payload.len(),
                        reason: e.to_string(),
                    };
                    match self.options.errors {
                        DecodeErrors::Strict => {
                            warn!("{}, falling back to hex", warning);
                            (hex::encode(&payload), PayloadMode::Hex, Some(warning))
                        }
                        DecodeErrors::Replace => {
                            warn!("{}, replacing invalid sequences", warning);
                            (
                                String::from_utf8_lossy(&payload).into_owned(),
                                PayloadMode::Lossy,
                                Some(warning),
                            )
                        }
                    }
                }
            }
        };

        debug!(
            "Decoded {} bytes on {} as {:?}",
            payload.len(),
            topic,
            mode
        );

        Decoded {
            message: InboundMessage {
                topic,
                payload: Payload {
                    raw: payload,
                    text,
                    mode,
                },
                qos,
                retain,
                received_at: Local::now(),
            },
            warning,
        }
    }
}
