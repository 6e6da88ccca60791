//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal:
//! 1. The cancel token is set; the scheduler stops dispatching
//! 2. Running engine processes are terminated
//! 3. Pending jobs are failed as CANCELLED and the report is still written
//! 4. The process exits with code 80 (CANCELLED)
//!
//! On a second signal the process exits immediately with code 80.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Exit code for cancelled batches
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Shared cancellation flag observed by the scheduler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
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
    /// First signal: initiate graceful cancellation
    InitiateCancellation,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Signal handler state
#[derive(Debug, Default)]
pub struct SignalState {
    token: CancelToken,
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new(token: CancelToken) -> Self {
        Self {
            token,
            immediate_exit: AtomicBool::new(false),
            signal_count: AtomicU8::new(0),
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check if immediate exit has been requested (second signal)
    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal and return the action to take
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.token.cancel();
            SignalAction::InitiateCancellation
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }
}

/// Installs the process-wide Ctrl-C handler
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new(token: CancelToken) -> Self {
        Self {
            state: Arc::new(SignalState::new(token)),
        }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler for SIGINT and SIGTERM.
    ///
    /// Must be called once at program startup.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::InitiateCancellation => {
                eprintln!("\nReceived interrupt signal, cancelling batch...");
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}
