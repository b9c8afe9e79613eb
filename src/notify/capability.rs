//! One-time probing of optional desktop features

use tracing::warn;

use crate::error::CapabilityWarning;

/// Outcome of probing an optional feature
#[derive(Debug)]
pub enum Capability<T> {
    Available(T),
    Unavailable(CapabilityWarning),
}

impl<T> Capability<T> {
    /// Runs `probe` once and logs a [`CapabilityWarning`] when it fails
    pub fn probe<E, F>(name: &'static str, probe: F) -> Self
    where
        E: std::fmt::Display,
        F: FnOnce() -> Result<T, E>,
    {
        match probe() {
            Ok(handle) => Capability::Available(handle),
            Err(e) => Self::unavailable(name, e.to_string()),
        }
    }

    pub fn unavailable(name: &'static str, reason: impl Into<String>) -> Self {
        let warning = CapabilityWarning {
            capability: name,
            reason: reason.into(),
        };
        warn!("{}, feature disabled", warning);
        Capability::Unavailable(warning)
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    /// Runs `action` on the handle; its first failure disables the capability
    ///
    /// Returns `true` only when the action ran and succeeded.
    pub fn run_or_disable<E, F>(&mut self, name: &'static str, action: F) -> bool
    where
        E: std::fmt::Display,
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let Capability::Available(handle) = self else {
            return false;
        };
        match action(handle) {
            Ok(()) => true,
            Err(e) => {
                *self = Self::unavailable(name, e.to_string());
                false
            }
        }
    }

    pub fn handle_mut(&mut self) -> Option<&mut T> {
        match self {
            Capability::Available(handle) => Some(handle),
            Capability::Unavailable(_) => None,
        }
    }
}

/// Snapshot of which desktop features the sink may use
///
/// Taken once at startup and never refreshed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub toast: bool,
    pub clipboard: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            toast: true,
            clipboard: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}
