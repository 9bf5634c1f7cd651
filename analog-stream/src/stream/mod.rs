//! Streaming sessions.
//!
//! A session binds one channel, one ping-pong buffer and one strategy, and
//! runs a controller loop on its own worker thread.
//!
//! ## Components
//!
//! | Type | Direction | Description |
//! |------|-----------|-------------|
//! | [`OutputPump`] | Output | Primes both halves, refills the half the DAC vacated |
//! | [`InputDrain`] | Input | Forwards the half the ADC finished, by parity |
//! | [`SessionHandle`] | both | Observes and stops a running session |
//!
//! ## Lifecycle
//!
//! ```text
//! output: Idle → Configuring → Priming → Streaming → Stopping → Idle
//! input:  Idle → Configuring →            Streaming → Stopping → Idle
//! ```
//!
//! A failure before `Streaming` returns from [`start`] with the session back
//! in `Idle`. A failure while streaming stops the session; it is returned by
//! [`SessionHandle::stop`] or [`SessionHandle::join`]. Nothing is retried.

pub mod input;
pub mod output;

pub use input::InputDrain;
pub use output::OutputPump;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::{ChannelSpec, StreamConfig};
use crate::device::{AnalogInputDevice, AnalogOutputDevice};
use crate::error::{StreamError, StreamResult};
use crate::signal::Canceller;
use crate::strategy::{SampleSink, SampleSource};

/// Which way samples flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Software produces, the DAC drains.
    Output,
    /// The ADC produces, software drains.
    Input,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Configuring = 1,
    Priming = 2,
    Streaming = 3,
    Stopping = 4,
}

impl StreamState {
    fn from_u8(value: u8) -> StreamState {
        match value {
            1 => StreamState::Configuring,
            2 => StreamState::Priming,
            3 => StreamState::Streaming,
            4 => StreamState::Stopping,
            _ => StreamState::Idle,
        }
    }
}

/// Counters of a session, readable while it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sample slots transferred. Wraps modulo 2^64.
    pub position: u64,
    /// Halves transferred.
    pub halves: u64,
    /// Input halves dropped by [`TransportPolicy::DropHalf`](crate::config::TransportPolicy).
    pub dropped: u64,
    /// Halves lost to overruns.
    pub overruns: u64,
    /// Completions merged into an already pending one.
    pub coalesced: u64,
}

/// State shared between a session's worker and its handle.
pub(crate) struct SessionShared {
    direction: Direction,
    channel: u8,
    state: AtomicU8,
    position: AtomicU64,
    halves: AtomicU64,
    dropped: AtomicU64,
    overruns: AtomicU64,
    coalesced: AtomicU64,
}

impl SessionShared {
    pub(crate) fn new(direction: Direction, channel: u8) -> Self {
        SessionShared {
            direction,
            channel,
            state: AtomicU8::new(StreamState::Idle as u8),
            position: AtomicU64::new(0),
            halves: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        let previous = StreamState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        tracing::debug!(
            direction = ?self.direction,
            channel = self.channel,
            from = ?previous,
            to = ?state,
            "stream state"
        );
    }

    pub(crate) fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn publish(&self, position: u64, halves: u64) {
        self.position.store(position, Ordering::Release);
        self.halves.store(halves, Ordering::Release);
    }

    pub(crate) fn set_dropped(&self, dropped: u64) {
        self.dropped.store(dropped, Ordering::Release);
    }

    pub(crate) fn add_overruns(&self, lost: u64) {
        self.overruns.fetch_add(lost, Ordering::AcqRel);
    }

    pub(crate) fn set_coalesced(&self, coalesced: u64) {
        self.coalesced.store(coalesced, Ordering::Release);
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            position: self.position.load(Ordering::Acquire),
            halves: self.halves.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            overruns: self.overruns.load(Ordering::Acquire),
            coalesced: self.coalesced.load(Ordering::Acquire),
        }
    }
}

/// Cloneable handle that stops a session from any thread.
#[derive(Clone)]
pub struct StopHandle {
    canceller: Canceller,
}

impl StopHandle {
    /// Request the session to stop. Idempotent; does not wait.
    pub fn stop(&self) {
        self.canceller.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.canceller.is_cancelled()
    }
}

/// Handle to a running session.
///
/// Dropping the handle stops the session and waits for its worker.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    canceller: Canceller,
    worker: Option<JoinHandle<StreamResult<()>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        canceller: Canceller,
        worker: JoinHandle<StreamResult<()>>,
    ) -> Self {
        SessionHandle {
            shared,
            canceller,
            worker: Some(worker),
        }
    }

    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    pub fn channel(&self) -> u8 {
        self.shared.channel
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Sample slots transferred so far.
    pub fn position(&self) -> u64 {
        self.shared.position.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            canceller: self.canceller.clone(),
        }
    }

    /// Whether the worker has exited, by stop or by failure.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the session and wait for it to wind down.
    ///
    /// Returns `Ok(())` for a clean stop, or the error that ended the
    /// session if it failed first.
    pub fn stop(mut self) -> StreamResult<()> {
        self.canceller.cancel();
        self.join_worker()
    }

    /// Wait for the session to end on its own, through a [`StopHandle`] or a
    /// failure.
    ///
    /// Any `Err` is the error that ended the session, whatever its kind. A
    /// transport error here means the session ran under
    /// [`TransportPolicy::Abort`](crate::config::TransportPolicy::Abort).
    pub fn join(mut self) -> StreamResult<()> {
        self.join_worker()
    }

    fn join_worker(&mut self) -> StreamResult<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.join() {
            Ok(Ok(())) | Ok(Err(StreamError::Cancelled)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.shared.set_state(StreamState::Idle);
                Err(StreamError::WorkerPanicked)
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.canceller.cancel();
            if let Err(e) = self.join_worker() {
                tracing::warn!(error = %e, "session ended with error");
            }
        }
    }
}

/// What a session drives: the device plus the software-side strategy.
///
/// The direction follows from the variant.
pub enum Strategy {
    Output {
        device: Box<dyn AnalogOutputDevice>,
        source: Box<dyn SampleSource>,
    },
    Input {
        device: Box<dyn AnalogInputDevice>,
        sink: Box<dyn SampleSink>,
    },
}

impl Strategy {
    pub fn output(
        device: impl AnalogOutputDevice + 'static,
        source: impl SampleSource + 'static,
    ) -> Self {
        Strategy::Output {
            device: Box::new(device),
            source: Box::new(source),
        }
    }

    pub fn input(
        device: impl AnalogInputDevice + 'static,
        sink: impl SampleSink + 'static,
    ) -> Self {
        Strategy::Input {
            device: Box::new(device),
            sink: Box::new(sink),
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Strategy::Output { .. } => Direction::Output,
            Strategy::Input { .. } => Direction::Input,
        }
    }
}

/// Configure `channel`, set up the buffer and start streaming.
///
/// Returns once the device is running and the controller loop is waiting for
/// the first completion.
///
/// # Errors
///
/// - [`StreamError::InvalidConfig`] for a bad config or channel spec.
/// - [`StreamError::Device`] if the device refuses configuration or start.
/// - [`StreamError::Source`] if the source cannot prime the buffer.
/// - [`StreamError::Spawn`] if the worker thread cannot be started.
///
/// ```
/// use analog_stream::config::{ChannelSpec, StreamConfig};
/// use analog_stream::sim::SimulatedDac;
/// use analog_stream::strategy::RampSource;
/// use analog_stream::stream::{self, Strategy, StreamState};
///
/// let (dac, _probe) = SimulatedDac::manual();
/// let config = StreamConfig::new(8).with_sample_width(1);
/// let session = stream::start(
///     &ChannelSpec::dac(1, 8),
///     &config,
///     Strategy::output(dac, RampSource::new(8, 1).unwrap()),
/// )
/// .unwrap();
///
/// assert_eq!(session.state(), StreamState::Streaming);
/// stream::stop(session).unwrap();
/// ```
pub fn start(
    channel: &ChannelSpec,
    config: &StreamConfig,
    strategy: Strategy,
) -> StreamResult<SessionHandle> {
    match strategy {
        Strategy::Output { device, source } => output::spawn(channel, config, device, source),
        Strategy::Input { device, sink } => input::spawn(channel, config, device, sink),
    }
}

/// Stop a session: unblock its wait, stop the device, release the buffer.
pub fn stop(handle: SessionHandle) -> StreamResult<()> {
    handle.stop()
}

#[cfg(all(test, feature = "sim"))]
mod integration_tests;
