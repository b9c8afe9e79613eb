//! Startup configuration
//!
//! Three layers, highest priority first: command-line flags, the optional
//! TOML file, built-in defaults. Broker credentials are only ever read from
//! the environment (`.env` is loaded first), never from flags or the file.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ClientError;
use crate::mqtt::config::{
    default_client_id, parse_topics, qos_from_u8, Credentials, MqttConfig, ReconnectPolicy,
};
use crate::mqtt::message_manager::{DecodeErrors, DecoderOptions};
use crate::notify::{DesktopOptions, SinkOptions};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEPALIVE: u64 = 60;
pub const DEFAULT_QOS: u8 = 1;
pub const DEFAULT_RECONNECT_DELAY: f64 = 5.0;
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const USERNAME_VAR: &str = "MQTT_USERNAME";
pub const PASSWORD_VAR: &str = "MQTT_PASSWORD";

const APP_DIR: &str = "sms-relay";
const CONFIG_FILE: &str = "client.toml";

/// Command-line flags; unset flags fall through to the file and defaults
#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(name = "sms-relay", bin_name = "sms-relay", version, about, long_about = None)]
pub struct Cli {
    /// broker host [default: 127.0.0.1]
    #[arg(long)]
    pub host: Option<String>,
    /// broker port [default: 1883]
    #[arg(long)]
    pub port: Option<u16>,
    /// topic filter, repeatable and comma separated [default: $SYS/#]
    #[arg(short = 't', long = "topic", visible_alias = "topics", value_name = "FILTER")]
    pub topics: Vec<String>,
    /// client id [default: sms-relay-<pid>]
    #[arg(long)]
    pub client_id: Option<String>,
    /// keep-alive in seconds, at least 5 [default: 60]
    #[arg(long, value_name = "SECS")]
    pub keepalive: Option<u64>,
    /// subscription QoS [default: 1]
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub qos: Option<u8>,
    /// print every payload as hex
    #[arg(long)]
    pub raw_payload: bool,
    /// handling of payloads that are not valid UTF-8 [default: strict]
    #[arg(long, value_enum)]
    pub decode_errors: Option<DecodeErrors>,
    /// print timestamps in UTC
    #[arg(long)]
    pub utc: bool,
    /// seconds between reconnects, 0 or less disables reconnecting [default: 5]
    #[arg(long, value_name = "SECS", allow_negative_numbers = true)]
    pub reconnect_delay: Option<f64>,
    /// give up after this many consecutive reconnects [default: unbounded]
    #[arg(long, value_name = "N")]
    pub max_reconnects: Option<u32>,
    /// seconds to wait for the broker's CONNACK [default: 10]
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,
    /// do not show desktop notifications
    #[arg(long)]
    pub no_toast: bool,
    /// do not copy codes to the clipboard
    #[arg(long)]
    pub no_clipboard: bool,
    /// log filter, any RUST_LOG directive [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
    /// TOML config file [default: <config dir>/sms-relay/client.toml]
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Contents of `client.toml`; every key is optional
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "topic")]
    pub topics: Vec<String>,
    pub client_id: Option<String>,
    pub keepalive: Option<u64>,
    pub qos: Option<u8>,
    pub raw_payload: Option<bool>,
    pub decode_errors: Option<DecodeErrors>,
    pub utc: Option<bool>,
    pub reconnect_delay: Option<f64>,
    pub max_reconnects: Option<u32>,
    pub connect_timeout: Option<u64>,
    pub toasts: Option<bool>,
    pub clipboard: Option<bool>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        toml::from_str(raw).map_err(|e| ClientError::Config(format!("invalid config file: {}", e)))
    }

    pub fn from_path(path: &Path) -> Result<Self, ClientError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&raw).map_err(|e| match e {
            ClientError::Config(reason) => {
                ClientError::Config(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Reads `explicit`, or the default file when it exists
    ///
    /// Returns the path that was read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ClientError> {
        if let Some(path) = explicit {
            return Ok((Self::from_path(path)?, Some(path.to_path_buf())));
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Ok((Self::from_path(&path)?, Some(path))),
            _ => Ok((Self::default(), None)),
        }
    }
}

/// Fully resolved settings for one client run
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub mqtt: MqttConfig,
    pub decoder: DecoderOptions,
    pub sink: SinkOptions,
    pub desktop: DesktopOptions,
    pub log_level: String,
    /// Config file the settings were read from
    pub source: Option<PathBuf>,
}

impl ClientConfig {
    /// Loads `.env`, the config file and the process environment
    pub fn load(cli: Cli) -> Result<Self, ClientError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(ClientError::Config(format!("invalid .env file: {}", e))),
        }

        let (file, source) = FileConfig::load(cli.config.as_deref())?;
        let mut config = Self::resolve(cli, file, |key| std::env::var(key).ok())?;
        config.source = source;
        Ok(config)
    }

    /// Merges the layers; `env` looks up environment variables
    pub fn resolve<E>(cli: Cli, file: FileConfig, env: E) -> Result<Self, ClientError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let host = cli.host.or(file.host).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let mut mqtt = MqttConfig::new(host, port);

        mqtt.topics = if cli.topics.is_empty() {
            parse_topics(&file.topics)
        } else {
            parse_topics(&cli.topics)
        };
        mqtt.client_id = cli
            .client_id
            .or(file.client_id)
            .unwrap_or_else(default_client_id);
        mqtt.keep_alive =
            Duration::from_secs(cli.keepalive.or(file.keepalive).unwrap_or(DEFAULT_KEEPALIVE));
        mqtt.qos = qos_from_u8(cli.qos.or(file.qos).unwrap_or(DEFAULT_QOS))?;

        let connect_timeout = cli
            .connect_timeout
            .or(file.connect_timeout)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        if connect_timeout == 0 {
            return Err(ClientError::Config("connect timeout must be at least 1 second".into()));
        }
        mqtt.connect_timeout = Duration::from_secs(connect_timeout);

        mqtt.reconnect = ReconnectPolicy::from_secs_f64(
            cli.reconnect_delay
                .or(file.reconnect_delay)
                .unwrap_or(DEFAULT_RECONNECT_DELAY),
            cli.max_reconnects.or(file.max_reconnects),
        );

        mqtt.credentials = match (env(USERNAME_VAR), env(PASSWORD_VAR)) {
            (Some(username), Some(secret)) => Some(Credentials::new(username, secret)),
            _ => None,
        };

        let decoder = DecoderOptions {
            raw_payload: cli.raw_payload || file.raw_payload.unwrap_or(false),
            errors: cli.decode_errors.or(file.decode_errors).unwrap_or_default(),
        };
        let sink = SinkOptions {
            utc: cli.utc || file.utc.unwrap_or(false),
            ..SinkOptions::default()
        };
        let desktop = DesktopOptions {
            toasts: !cli.no_toast && file.toasts.unwrap_or(true),
            clipboard: !cli.no_clipboard && file.clipboard.unwrap_or(true),
            ..DesktopOptions::default()
        };
        let log_level = cli
            .log_level
            .or(file.log_level)
            .or_else(|| env("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            mqtt,
            decoder,
            sink,
            desktop,
            log_level,
            source: None,
        })
    }
}
