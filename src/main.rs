use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sms_relay::config::{Cli, ClientConfig};
use sms_relay::mqtt::{MqttHandler, PayloadDecoder, RumqttConnector};
use sms_relay::notify::{DesktopDispatcher, DesktopSink};
use sms_relay::runtime::{IoContext, IoRuntime};

fn main() -> Result<()> {
    setup()?;

    let config = ClientConfig::load(Cli::parse())?;
    setup_logging(&config.log_level);
    match &config.source {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("No configuration file, using flags and defaults"),
    }

    // must exist before the connection manager opens any socket
    let io = IoRuntime::init()?;
    io.block_on(run(config, io.context()))
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}

async fn run(config: ClientConfig, io: IoContext) -> Result<()> {
    let dispatcher = match DesktopDispatcher::spawn(config.desktop.clone()).await {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            warn!("{}, continuing with console output only", e);
            DesktopDispatcher::disconnected()
        }
    };
    let sink = DesktopSink::new(config.sink, dispatcher);

    let token = CancellationToken::new();
    let handler = MqttHandler::new(
        &io,
        config.mqtt,
        RumqttConnector,
        sink,
        PayloadDecoder::new(config.decoder),
    );
    let handle = handler.spawn(token.clone());
    let status = handle.status();

    let signal_token = token.clone();
    io.handle().spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    let outcome = handle.join().await;
    let summary = status.borrow().clone();
    info!(
        "Received {} messages ({} codes, {} decode warnings, {} reconnects)",
        summary.messages_received,
        summary.codes_extracted,
        summary.decode_warnings,
        summary.reconnect_attempts
    );

    match outcome {
        Ok(()) => {
            info!("Client stopped");
            Ok(())
        }
        Err(e) => {
            error!("Final connection failure: {}", e);
            Err(eyre!(e))
        }
    }
}
