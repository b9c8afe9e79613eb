//! Desktop client for phone-forwarded SMS over MQTT
//!
//! Subscribes to the broker, decodes each publish, pulls out verification
//! codes and surfaces them as console lines, desktop notifications and
//! clipboard content.

pub mod config;
pub mod error;
pub mod mqtt;
pub mod notify;
pub mod runtime;
pub mod sms;

pub use error::ClientError;
