//! Sample sinks for input streaming.
//!
//! A sink receives each captured half exactly once, in capture order. The
//! forwarding call runs on the input controller's thread between two
//! completions, so a sink slower than one half-period causes overruns.
//! [`QueuedSink`] moves the transport onto its own thread behind a bounded
//! queue and reports a full queue as [`TransportError::Backpressure`].

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};

use crate::device::ByteTransport;
use crate::error::TransportError;

/// Consumes the halves captured by an input session.
pub trait SampleSink: Send {
    /// Forward one captured half. The slice is only valid for this call.
    fn forward(&mut self, half: &[u8]) -> Result<(), TransportError>;
}

impl<T: SampleSink + ?Sized> SampleSink for Box<T> {
    fn forward(&mut self, half: &[u8]) -> Result<(), TransportError> {
        (**self).forward(half)
    }
}

/// Sink backed by a closure.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(&[u8]) -> Result<(), TransportError> + Send,
{
    pub fn new(f: F) -> Self {
        FnSink { f }
    }
}

impl<F> SampleSink for FnSink<F>
where
    F: FnMut(&[u8]) -> Result<(), TransportError> + Send,
{
    fn forward(&mut self, half: &[u8]) -> Result<(), TransportError> {
        (self.f)(half)
    }
}

/// Forwards every half straight to a [`ByteTransport`], blocking until the
/// transport has taken all of it.
pub struct TransportSink<T> {
    transport: T,
    bytes_sent: u64,
}

impl<T: ByteTransport> TransportSink<T> {
    pub fn new(transport: T) -> Self {
        TransportSink {
            transport,
            bytes_sent: 0,
        }
    }

    /// Bytes accepted by the transport so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: ByteTransport> SampleSink for TransportSink<T> {
    fn forward(&mut self, half: &[u8]) -> Result<(), TransportError> {
        self.transport.send(half)?;
        self.bytes_sent += half.len() as u64;
        Ok(())
    }
}

/// Sink that copies each half into a bounded queue drained by a dedicated
/// transport thread.
///
/// The queue holds at most `depth` halves. `forward` never blocks: a full
/// queue yields [`TransportError::Backpressure`]. Once the transport fails,
/// the thread exits and every later `forward` returns
/// [`TransportError::Closed`]; the failure itself is returned by
/// [`finish`](Self::finish).
pub struct QueuedSink {
    tx: Option<Sender<Vec<u8>>>,
    depth: usize,
    worker: Option<JoinHandle<Result<(), TransportError>>>,
}

impl QueuedSink {
    /// Spawn the transport thread.
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] if the thread cannot be spawned.
    pub fn spawn<T: ByteTransport + 'static>(
        mut transport: T,
        depth: usize,
    ) -> Result<Self, TransportError> {
        let depth = depth.max(1);
        let (tx, rx) = bounded::<Vec<u8>>(depth);

        let worker = thread::Builder::new()
            .name("analog-stream-sink".into())
            .spawn(move || {
                for half in rx {
                    if let Err(e) = transport.send(&half) {
                        tracing::error!(error = %e, "queued sink transport failed");
                        return Err(e);
                    }
                }
                Ok(())
            })?;

        Ok(QueuedSink {
            tx: Some(tx),
            depth,
            worker: Some(worker),
        })
    }

    /// Maximum number of halves waiting for the transport.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Halves currently waiting for the transport.
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Close the queue, wait for the transport to drain it, and return the
    /// transport's outcome.
    pub fn finish(mut self) -> Result<(), TransportError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        drop(self.tx.take());
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TransportError::Rejected("sink thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl SampleSink for QueuedSink {
    fn forward(&mut self, half: &[u8]) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        match tx.try_send(half.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TransportError::Backpressure { depth: self.depth }),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }
}

impl Drop for QueuedSink {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "queued sink closed with error");
        }
    }
}
