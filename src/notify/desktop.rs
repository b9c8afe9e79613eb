//! Desktop side effects: toast notifications and clipboard writes
//!
//! Platform handles (notably the clipboard) are not `Send` everywhere, so
//! they live on a dedicated OS thread for the whole process lifetime. The
//! async side only ever talks to that thread through a bounded channel.

use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::capability::{Capabilities, Capability};
use super::ToastText;
use crate::error::ClientError;

pub const APP_NAME: &str = "SMS-Relay";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

/// Work item for the desktop thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesktopEvent {
    Toast { toast: ToastText, priority: Priority },
    /// Replace clipboard content with exactly this text
    Clipboard(String),
}

impl DesktopEvent {
    fn kind(&self) -> &'static str {
        match self {
            DesktopEvent::Toast { .. } => "toast",
            DesktopEvent::Clipboard(_) => "clipboard write",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DesktopOptions {
    pub app_name: String,
    /// Probe and use toast notifications
    pub toasts: bool,
    /// Probe and use the clipboard
    pub clipboard: bool,
    pub queue_capacity: usize,
    /// Longest time the receive loop waits for a queue slot
    pub dispatch_timeout: Duration,
}

impl Default for DesktopOptions {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            toasts: true,
            clipboard: true,
            queue_capacity: 32,
            dispatch_timeout: Duration::from_millis(250),
        }
    }
}

/// Async handle to the desktop thread
#[derive(Debug, Clone)]
pub struct DesktopDispatcher {
    tx: mpsc::Sender<DesktopEvent>,
    capabilities: Capabilities,
    timeout: Duration,
}

impl DesktopDispatcher {
    /// Wraps an existing queue; the receiver side is driven by the caller
    pub fn new(
        tx: mpsc::Sender<DesktopEvent>,
        capabilities: Capabilities,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            capabilities,
            timeout,
        }
    }

    /// Dispatcher with no desktop thread behind it and every capability off
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx, Capabilities::none(), Duration::ZERO)
    }

    /// Starts the desktop thread and waits for its capability probe
    pub async fn spawn(options: DesktopOptions) -> Result<Self, ClientError> {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let (probe_tx, probe_rx) = oneshot::channel();
        let timeout = options.dispatch_timeout;

        std::thread::Builder::new()
            .name("desktop-notify".to_string())
            .spawn(move || {
                let mut backends = Backends::probe(&options);
                if probe_tx.send(backends.capabilities()).is_err() {
                    warn!("Desktop probe result was not received");
                    return;
                }
                backends.run(rx);
            })
            .map_err(|e| {
                ClientError::Capability(format!("failed to spawn desktop thread: {}", e))
            })?;

        let capabilities = probe_rx
            .await
            .map_err(|_| ClientError::Capability("desktop thread exited during probe".into()))?;
        info!(
            "Desktop capabilities: toast={}, clipboard={}",
            capabilities.toast, capabilities.clipboard
        );

        Ok(Self::new(tx, capabilities, timeout))
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Queues `event`, giving up after the dispatch timeout
    ///
    /// Returns whether the event was queued. Failures are logged, never raised.
    pub async fn dispatch(&self, event: DesktopEvent) -> bool {
        match self.tx.send_timeout(event, self.timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(event)) => {
                warn!(
                    "Desktop queue full for {:?}, dropped {}",
                    self.timeout,
                    event.kind()
                );
                false
            }
            Err(SendTimeoutError::Closed(event)) => {
                warn!("Desktop thread is gone, dropped {}", event.kind());
                false
            }
        }
    }
}

struct ToastBackend {
    app_name: String,
}

impl ToastBackend {
    fn show(&self, toast: &ToastText, priority: Priority) -> Result<(), notify_rust::error::Error> {
        let mut notification = notify_rust::Notification::new();
        notification
            .appname(&self.app_name)
            .summary(&toast.title)
            .body(&toast.body);

        #[cfg(all(unix, not(target_os = "macos")))]
        notification.urgency(match priority {
            Priority::High => notify_rust::Urgency::Critical,
            Priority::Normal => notify_rust::Urgency::Normal,
        });
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        let _ = priority;

        notification.show().map(|_| ())
    }
}

struct Backends {
    toast: Capability<ToastBackend>,
    clipboard: Capability<arboard::Clipboard>,
}

impl Backends {
    fn probe(options: &DesktopOptions) -> Self {
        let toast = if options.toasts {
            probe_toast(&options.app_name)
        } else {
            Capability::unavailable("toast", "disabled by configuration")
        };
        let clipboard = if options.clipboard {
            Capability::probe("clipboard", arboard::Clipboard::new)
        } else {
            Capability::unavailable("clipboard", "disabled by configuration")
        };
        Self { toast, clipboard }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            toast: self.toast.is_available(),
            clipboard: self.clipboard.is_available(),
        }
    }

    fn run(&mut self, mut rx: mpsc::Receiver<DesktopEvent>) {
        debug!("Desktop thread running");
        while let Some(event) = rx.blocking_recv() {
            self.handle(event);
        }
        debug!("Desktop queue closed, thread exiting");
    }

    fn handle(&mut self, event: DesktopEvent) {
        match event {
            DesktopEvent::Toast { toast, priority } => {
                // a server that failed once is not retried on every message
                self.toast.run_or_disable("toast", |backend| backend.show(&toast, priority));
            }
            DesktopEvent::Clipboard(text) => {
                if let Some(clipboard) = self.clipboard.handle_mut() {
                    match clipboard.set_text(text) {
                        Ok(()) => debug!("Clipboard updated"),
                        Err(e) => warn!("Failed to write clipboard: {}", e),
                    }
                }
            }
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn probe_toast(app_name: &str) -> Capability<ToastBackend> {
    Capability::probe("toast", || {
        notify_rust::get_server_information().map(|server| {
            debug!("Notification server: {} {}", server.name, server.version);
            ToastBackend {
                app_name: app_name.to_string(),
            }
        })
    })
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn probe_toast(app_name: &str) -> Capability<ToastBackend> {
    Capability::Available(ToastBackend {
        app_name: app_name.to_string(),
    })
}
