use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::constants;

/// Operator stop signal shared between the signal handler, the run loop and
/// the subprocess runner.
///
/// The first request ends the run loop and lets the monitor save the current
/// print. A second request forces running subprocesses to be killed.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
    forced: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            self.forced.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Whether the operator asked to stop more than once.
    pub fn is_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }

    /// Sleep until `deadline`, waking early if a stop is requested.
    ///
    /// Returns `true` if the sleep was cut short by a stop request.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        let slice = Duration::from_millis(constants::SHUTDOWN_POLL_MILLIS);
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let shutdown = Shutdown::new();
        let handle = shutdown.clone();
        assert!(!shutdown.is_requested());
        handle.request();
        assert!(shutdown.is_requested());
    }

    #[test]
    fn second_request_forces() {
        let shutdown = Shutdown::new();
        shutdown.request();
        assert!(shutdown.is_requested());
        assert!(!shutdown.is_forced());
        shutdown.clone().request();
        assert!(shutdown.is_forced());
    }

    #[test]
    fn sleep_returns_immediately_once_requested() {
        let shutdown = Shutdown::new();
        shutdown.request();
        let start = Instant::now();
        assert!(shutdown.sleep_until(start + Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
