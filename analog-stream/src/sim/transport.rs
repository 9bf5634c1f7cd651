//! In-memory byte transport.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::device::ByteTransport;
use crate::error::TransportError;

/// Transport collecting everything sent into a shared buffer.
///
/// Clones share the same buffer, so a test keeps one clone and hands the
/// other to a sink.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    data: Arc<Mutex<Vec<u8>>>,
    sends: Arc<AtomicU64>,
    failures: Arc<AtomicUsize>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All bytes accepted so far.
    pub fn contents(&self) -> Vec<u8> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful `send` calls.
    pub fn sends(&self) -> u64 {
        self.sends.load(Ordering::Relaxed)
    }

    /// Reject the next `count` sends.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::Relaxed);
    }
}

impl ByteTransport for MemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let injected = self
            .failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Rejected("injected failure".into()));
        }

        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        self.sends.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
