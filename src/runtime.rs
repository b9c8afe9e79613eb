//! Process-wide I/O context
//!
//! The async runtime is built exactly once, by the entry point, before any
//! connection manager exists. Its handle is then passed explicitly to every
//! component that schedules work; nothing reaches for an ambient runtime.

use std::future::Future;
use std::sync::OnceLock;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};

use crate::error::ClientError;

/// Readiness mechanism used by the runtime's I/O driver on this platform
#[cfg(target_os = "windows")]
pub const IO_BACKEND: &str = "IOCP";
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const IO_BACKEND: &str = "epoll";
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub const IO_BACKEND: &str = "kqueue";
#[cfg(not(any(
    target_os = "windows",
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub const IO_BACKEND: &str = "poll";

static RUNTIME: OnceLock<IoRuntime> = OnceLock::new();

/// The process runtime, owned by the entry point
#[derive(Debug)]
pub struct IoRuntime {
    runtime: Runtime,
}

impl IoRuntime {
    /// Builds the runtime on first call and returns the same one afterwards
    pub fn init() -> Result<&'static IoRuntime, ClientError> {
        if let Some(existing) = RUNTIME.get() {
            debug!("I/O context already initialised");
            return Ok(existing);
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sms-relay-io")
            .enable_all()
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build async runtime: {}", e)))?;

        let mut fresh = false;
        let installed = RUNTIME.get_or_init(|| {
            fresh = true;
            IoRuntime { runtime }
        });
        if fresh {
            info!("I/O context ready ({} backend)", IO_BACKEND);
        }
        Ok(installed)
    }

    pub fn context(&self) -> IoContext {
        IoContext {
            handle: self.runtime.handle().clone(),
        }
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

/// Cloneable scheduling handle passed into components
#[derive(Debug, Clone)]
pub struct IoContext {
    handle: Handle,
}

impl IoContext {
    /// Context of the runtime the caller is already running on
    ///
    /// Fails outside of a runtime.
    pub fn current() -> Result<Self, ClientError> {
        Handle::try_current()
            .map(|handle| Self { handle })
            .map_err(|e| ClientError::Config(format!("no async runtime: {}", e)))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let first = IoRuntime::init().unwrap();
        let second = IoRuntime::init().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.block_on(async { 21 * 2 }), 42);
    }

    #[test]
    fn current_fails_outside_runtime() {
        assert!(IoContext::current().is_err());
    }

    #[tokio::test]
    async fn current_inside_runtime() {
        let context = IoContext::current().unwrap();
        let joined = context.handle().spawn(async { "done" }).await.unwrap();
        assert_eq!(joined, "done");
    }
}
