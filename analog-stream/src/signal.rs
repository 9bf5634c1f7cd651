//! Completion signal between the hardware-paced side and a stream controller.
//!
//! The hardware side holds a [`Notifier`] and raises one completion per
//! finished half. The controller blocks in [`CompletionSignal::wait`].
//! A supervisory context holds a [`Canceller`] to stop the wait.
//!
//! ```text
//! hardware context           single slot            controller thread
//! ┌──────────────┐  notify  ┌───────────┐  wait   ┌──────────────────┐
//! │  Notifier    ├─────────►│ Half (≤1) ├────────►│ CompletionSignal │
//! └──────────────┘          └───────────┘         └──────────────────┘
//!                   cancel  ┌───────────┐    ▲
//! supervisor ──────────────►│  () (≤1)  ├────┘
//!                           └───────────┘
//! ```
//!
//! The ready slot is a crossbeam channel of capacity 1. A notification that
//! finds the slot occupied is coalesced into the pending one and counted.
//! Once cancelled, every later `wait` returns [`StreamError::Cancelled`] and
//! every later `notify` is ignored.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{after, bounded, never, select, Receiver, Sender, TrySendError};

use crate::buffer::Half;
use crate::error::{StreamError, StreamResult};

struct Shared {
    ready_tx: Sender<Half>,
    cancel_tx: Sender<()>,
    cancelled: AtomicBool,
    coalesced: AtomicU64,
}

impl Shared {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // A full slot already carries the wake-up.
        let _ = self.cancel_tx.try_send(());
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Waiting side of a completion signal. Owned by exactly one controller loop.
pub struct CompletionSignal {
    shared: Arc<Shared>,
    ready_rx: Receiver<Half>,
    cancel_rx: Receiver<()>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = bounded(1);
        let (cancel_tx, cancel_rx) = bounded(1);

        CompletionSignal {
            shared: Arc::new(Shared {
                ready_tx,
                cancel_tx,
                cancelled: AtomicBool::new(false),
                coalesced: AtomicU64::new(0),
            }),
            ready_rx,
            cancel_rx,
        }
    }

    /// Handle for the hardware-paced side.
    pub fn notifier(&self) -> Notifier {
        Notifier {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Handle for stopping the wait from another context.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Reset to not-ready.
    ///
    /// Returns `true` if a pending completion was discarded. A controller
    /// re-arms right after `wait` returns, so a discarded completion means the
    /// hardware finished another half before the loop was ready for it.
    pub fn arm(&self) -> bool {
        self.ready_rx.try_recv().is_ok()
    }

    /// Block until a completion is pending, consume it, and return the half
    /// it reports.
    ///
    /// # Errors
    ///
    /// - [`StreamError::Cancelled`] if the signal is cancelled before or
    ///   during the wait.
    /// - [`StreamError::Starvation`] if `timeout` elapses first.
    pub fn wait(&self, timeout: Option<Duration>) -> StreamResult<Half> {
        if self.shared.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let deadline = match timeout {
            Some(t) => after(t),
            None => never(),
        };

        select! {
            recv(self.ready_rx) -> msg => match msg {
                Ok(half) if !self.shared.is_cancelled() => Ok(half),
                _ => Err(StreamError::Cancelled),
            },
            recv(self.cancel_rx) -> _ => Err(StreamError::Cancelled),
            recv(deadline) -> _ => Err(StreamError::Starvation {
                waited: timeout.unwrap_or(Duration::ZERO),
            }),
        }
    }

    /// Whether a completion is pending right now.
    pub fn is_ready(&self) -> bool {
        !self.ready_rx.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Number of notifications merged into an already pending one.
    pub fn coalesced(&self) -> u64 {
        self.shared.coalesced.load(Ordering::Relaxed)
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware-side handle: raises completions.
///
/// `notify` never blocks and performs no allocation, so it may be called from
/// a clock or interrupt-like context.
#[derive(Clone)]
pub struct Notifier {
    shared: Arc<Shared>,
}

impl Notifier {
    /// Mark `half` as finished.
    ///
    /// Returns `false` if the notification was ignored because the signal
    /// was cancelled or its waiting side is gone.
    pub fn notify(&self, half: Half) -> bool {
        if self.shared.is_cancelled() {
            return false;
        }

        match self.shared.ready_tx.try_send(half) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.shared.coalesced.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}

/// Supervisory handle: cancels a signal from any context.
#[derive(Clone)]
pub struct Canceller {
    shared: Arc<Shared>,
}

impl Canceller {
    /// Unblock a pending wait and ignore further notifications. Idempotent.
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}
