//! Cooperative cancellation and Ctrl-C handling
//!
//! On the first SIGINT the shared token is tripped; long-running scans
//! (port search, directory copy, image materialization) check it between
//! units of work and stop with a cancelled error. On a second SIGINT the
//! process exits immediately with code 80.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for cancelled commands
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Shared cancellation flag, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: trip the token
    Cancel,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Counts signals and trips the token.
#[derive(Debug, Default)]
pub struct SignalState {
    token: CancellationToken,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            signal_count: AtomicU8::new(0),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record one signal and decide what to do.
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.token.cancel();
                SignalAction::Cancel
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Install the process-wide Ctrl-C handler. Call once at startup.
pub fn install(token: CancellationToken) -> Result<(), ctrlc::Error> {
    let state = Arc::new(SignalState::new(token));
    ctrlc::set_handler(move || match state.handle_signal() {
        SignalAction::Cancel => {
            eprintln!("\nReceived interrupt, stopping after the current step...");
        }
        SignalAction::ImmediateExit => {
            eprintln!("\nReceived second interrupt, exiting immediately");
            std::process::exit(EXIT_CODE_CANCELLED);
        }
        SignalAction::Ignore => {}
    })
}
