//! Signal handling: SIGTERM/SIGINT graceful shutdown, SIGHUP config reload,
//! SIGUSR1 immediate rediscovery.
//!
//! Uses `signal-hook` flag registration. The dispatcher polls the flags on every
//! tick instead of blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Signal state shared between the OS hooks and the dispatcher loop.
#[derive(Clone, Debug)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reload_flag: Arc<AtomicBool>,
    discover_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS hooks. Registration failures are reported
    /// on stderr and otherwise ignored.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Handler driven only by the `request_*` methods (tests, `once` mode).
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            reload_flag: Arc::new(AtomicBool::new(false)),
            discover_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Check and clear the reload request.
    pub fn should_reload(&self) -> bool {
        self.reload_flag.swap(false, Ordering::Relaxed)
    }

    /// Check and clear the rediscovery request.
    pub fn should_discover(&self) -> bool {
        self.discover_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reload(&self) {
        self.reload_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_discover(&self) {
        self.discover_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.shutdown_flag)) {
                eprintln!("[HFW-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGHUP, SIGUSR1};
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reload_flag)) {
                eprintln!("[HFW-SIGNAL] failed to register SIGHUP: {e}");
            }
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.discover_flag)) {
                eprintln!("[HFW-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_quiet() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_shutdown());
        assert!(!handler.should_reload());
        assert!(!handler.should_discover());
    }

    #[test]
    fn shutdown_is_sticky() {
        let handler = SignalHandler::unregistered();
        handler.request_shutdown();
        assert!(handler.should_shutdown());
        assert!(handler.should_shutdown());
    }

    #[test]
    fn reload_and_discover_clear_on_read() {
        let handler = SignalHandler::unregistered();
        handler.request_reload();
        handler.request_discover();
        assert!(handler.should_reload());
        assert!(!handler.should_reload());
        assert!(handler.should_discover());
        assert!(!handler.should_discover());
    }

    #[test]
    fn clones_share_state() {
        let handler = SignalHandler::unregistered();
        let other = handler.clone();
        handler.request_shutdown();
        assert!(other.should_shutdown());
    }
}
