//! Stop signal for the event loop.
//!
//! The reactor checks the flag at the top of every iteration. Handles can
//! also wake a blocked wait immediately; OS signals only set the flag and
//! are picked up when the bounded wait times out.

use mio::Waker;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable, thread-safe request to stop a reactor.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
        }
    }

    /// Request shutdown and wake the reactor.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // A failed wake only delays shutdown until the wait times out
        let _ = self.waker.wake();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Route SIGINT and SIGTERM to this handle.
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.requested))?;
        }
        Ok(())
    }
}
