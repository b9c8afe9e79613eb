//! # Notification Sink
//!
//! Delivers every decoded message to the user: a console line and log record
//! always, a toast where the desktop supports it. Messages carrying a
//! verification code get a second high-priority toast and the code is
//! written to the clipboard.
//!
//! ```text
//! notify/
//! ├── capability.rs  - one-time feature probing
//! └── desktop.rs     - desktop thread owning toast and clipboard handles
//! ```
//!
//! Desktop side effects never block the receive loop for longer than the
//! dispatcher's timeout, and no failure here stops message processing.

pub mod capability;
pub mod desktop;

use async_trait::async_trait;
use tracing::info;

use crate::mqtt::message_manager::InboundMessage;
use crate::sms::{ExtractedCode, MessageContent};
pub use capability::{Capabilities, Capability};
pub use desktop::{DesktopDispatcher, DesktopEvent, DesktopOptions, Priority};

const MAX_TITLE_CHARS: usize = 200;
const MAX_BODY_CHARS: usize = 500;
const MAX_BODY_LINES: usize = 6;
const ELLIPSIS: char = '…';

/// Everything known about one message at delivery time
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub message: &'a InboundMessage,
    pub content: &'a MessageContent,
    pub code: Option<&'a ExtractedCode>,
}

/// Receives decoded messages from the connection manager, in arrival order
#[async_trait]
pub trait Sink: Send {
    async fn notify(&mut self, delivery: Delivery<'_>);
}

/// Title and body trimmed to what toast APIs display reliably
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastText {
    pub title: String,
    pub body: String,
}

impl ToastText {
    pub fn new(title: &str, body: &str) -> Self {
        let title = title.trim();
        let title = if title.is_empty() {
            "MQTT notification".to_string()
        } else {
            truncate(title, MAX_TITLE_CHARS)
        };

        let body = body.replace('\r', "");
        let mut lines: Vec<&str> = body.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            lines.push(crate::sms::content::EMPTY_BODY);
        }
        let overflow = lines.len() > MAX_BODY_LINES;
        lines.truncate(MAX_BODY_LINES);

        let mut joined = lines.join("\n");
        if overflow {
            joined.push('\n');
            joined.push(ELLIPSIS);
        }

        Self {
            title,
            body: truncate(&joined, MAX_BODY_CHARS),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars - 3).collect();
    truncated.push(ELLIPSIS);
    truncated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOptions {
    /// Render console timestamps in UTC
    pub utc: bool,
    /// Print the console line for each message
    pub console: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            utc: false,
            console: true,
        }
    }
}

/// The production sink: console, log, toast and clipboard
pub struct DesktopSink {
    options: SinkOptions,
    dispatcher: DesktopDispatcher,
}

impl DesktopSink {
    pub fn new(options: SinkOptions, dispatcher: DesktopDispatcher) -> Self {
        Self {
            options,
            dispatcher,
        }
    }
}

#[async_trait]
impl Sink for DesktopSink {
    async fn notify(&mut self, delivery: Delivery<'_>) {
        let Delivery {
            message,
            content,
            code,
        } = delivery;
        let capabilities = self.dispatcher.capabilities();

        if self.options.console {
            println!("{}", message.render(self.options.utc));
        }
        info!(
            "Message on {} ({} bytes, retain={})",
            message.topic(),
            message.payload().raw().len(),
            message.retain()
        );

        if capabilities.toast {
            let toast = ToastText::new(&content.default_headline, &content.body);
            self.dispatcher
                .dispatch(DesktopEvent::Toast {
                    toast,
                    priority: Priority::Normal,
                })
                .await;
        }

        let Some(code) = code else {
            return;
        };
        info!("Verification code {} on {}", code, message.topic());

        if capabilities.toast {
            let toast = ToastText::new(&format!("Verification code: {}", code.code), &content.body);
            self.dispatcher
                .dispatch(DesktopEvent::Toast {
                    toast,
                    priority: Priority::High,
                })
                .await;
        }
        if capabilities.clipboard {
            self.dispatcher
                .dispatch(DesktopEvent::Clipboard(code.code.clone()))
                .await;
        }
    }
}
