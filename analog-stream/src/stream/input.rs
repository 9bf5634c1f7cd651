//! Input streaming: the ADC fills, software drains.
//!
//! ```text
//! start_async_capture(port over whole buffer)
//! loop:  wait ─► arm ─► parity says half k ─► sink.forward(half k)
//!             ─► release ─► overrun check ─► k ^= 1, pos += N/2
//! ```
//!
//! Parity decides which half is forwarded. The half named by the completion
//! and the half held under lease must agree with it; any disagreement stops
//! the session.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::buffer::{Half, PingPongBuffer};
use crate::capture::{CapturePort, CaptureRegion};
use crate::config::{ChannelSpec, StreamConfig, TransportPolicy};
use crate::device::AnalogInputDevice;
use crate::error::{DeviceError, StreamError, StreamResult};
use crate::signal::CompletionSignal;
use crate::strategy::SampleSink;

use super::{Direction, SessionHandle, SessionShared, StreamState};

/// Steady-state steps of an input session, without threads.
pub struct InputDrain<K> {
    region: Arc<CaptureRegion>,
    sink: K,
    policy: TransportPolicy,
    expected: Half,
    half_samples: u64,
    position: u64,
    halves: u64,
    dropped: u64,
}

impl<K: SampleSink> InputDrain<K> {
    pub(crate) fn new(region: Arc<CaptureRegion>, sink: K, config: &StreamConfig) -> Self {
        InputDrain {
            region,
            sink,
            policy: config.transport_policy,
            expected: Half::First,
            half_samples: config.half_samples() as u64,
            position: 0,
            halves: 0,
            dropped: 0,
        }
    }

    /// Forward the half the device just finished.
    ///
    /// # Errors
    ///
    /// - [`StreamError::HalfMismatch`] if `completed` or the leased half
    ///   disagrees with the parity counter.
    /// - [`StreamError::Transport`] if the sink fails under
    ///   [`TransportPolicy::Abort`].
    /// - [`StreamError::Overrun`] if the device had to overwrite captures
    ///   while the sink was busy.
    pub fn drain(&mut self, completed: Half) -> StreamResult<()> {
        let expected = self.expected;
        if completed != expected {
            return Err(StreamError::HalfMismatch {
                expected,
                actual: completed,
            });
        }

        let sink = &mut self.sink;
        let (leased, sent) = self
            .region
            .read_leased(|half, bytes| (half, sink.forward(bytes)))
            .ok_or_else(|| {
                StreamError::device(
                    "start_async_capture",
                    DeviceError::other("completion raised without a captured half"),
                )
            })?;
        self.region.release();

        if leased != expected {
            return Err(StreamError::HalfMismatch {
                expected,
                actual: leased,
            });
        }

        match sent {
            Ok(()) => {
                self.position = self.position.wrapping_add(self.half_samples);
                self.halves += 1;
            }
            Err(e) => match self.policy {
                TransportPolicy::Abort => return Err(e.into()),
                TransportPolicy::DropHalf => {
                    self.dropped += 1;
                    tracing::warn!(
                        half = %expected,
                        dropped = self.dropped,
                        error = %e,
                        "dropped captured half"
                    );
                }
            },
        }

        let lost = self.region.take_overruns();
        if lost > 0 {
            return Err(StreamError::Overrun { lost });
        }

        self.expected = expected.other();
        Ok(())
    }

    /// Sample slots forwarded to the sink so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Halves forwarded so far.
    pub fn halves(&self) -> u64 {
        self.halves
    }

    /// Halves the sink failed to take under [`TransportPolicy::DropHalf`].
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Half the next completion must report.
    pub fn expected_half(&self) -> Half {
        self.expected
    }
}

/// Bring up an input session and spawn its controller.
pub(crate) fn spawn<D, K>(
    channel: &ChannelSpec,
    config: &StreamConfig,
    mut device: D,
    sink: K,
) -> StreamResult<SessionHandle>
where
    D: AnalogInputDevice + 'static,
    K: SampleSink + 'static,
{
    let shared = Arc::new(SessionShared::new(Direction::Input, channel.channel_id));

    let (drain, signal) = match bring_up(&shared, channel, config, &mut device, sink) {
        Ok(started) => started,
        Err(e) => {
            shared.set_state(StreamState::Idle);
            tracing::error!(
                channel = channel.channel_id,
                error = %e,
                "input stream failed to start"
            );
            return Err(e);
        }
    };

    shared.set_state(StreamState::Streaming);
    tracing::info!(
        channel = channel.channel_id,
        capacity = config.capacity,
        policy = ?config.transport_policy,
        "input stream running"
    );

    let canceller = signal.canceller();
    let worker_shared = Arc::clone(&shared);
    let timeout = config.starvation_timeout;
    let channel_id = channel.channel_id;
    let spawned = thread::Builder::new()
        .name("analog-stream-in".into())
        .spawn(move || run(drain, device, channel_id, signal, timeout, &worker_shared));

    match spawned {
        Ok(worker) => Ok(SessionHandle::new(shared, canceller, worker)),
        Err(e) => {
            canceller.cancel();
            shared.set_state(StreamState::Idle);
            Err(StreamError::Spawn(e))
        }
    }
}

fn bring_up<D, K>(
    shared: &SessionShared,
    channel: &ChannelSpec,
    config: &StreamConfig,
    device: &mut D,
    sink: K,
) -> StreamResult<(InputDrain<K>, CompletionSignal)>
where
    D: AnalogInputDevice,
    K: SampleSink,
{
    config.validate()?;
    channel.validate()?;

    shared.set_state(StreamState::Configuring);
    device
        .configure(channel)
        .map_err(|e| StreamError::device("configure", e))?;

    let buffer = PingPongBuffer::new(config.buffer_bytes()?)?;
    let region = Arc::new(CaptureRegion::new(buffer));
    let signal = CompletionSignal::new();
    let port = CapturePort::new(Arc::clone(&region), signal.notifier(), channel.channel_id);
    device
        .start_async_capture(port)
        .map_err(|e| StreamError::device("start_async_capture", e))?;

    Ok((InputDrain::new(region, sink, config), signal))
}

fn run<D, K>(
    mut drain: InputDrain<K>,
    mut device: D,
    channel: u8,
    signal: CompletionSignal,
    timeout: Option<Duration>,
    shared: &SessionShared,
) -> StreamResult<()>
where
    D: AnalogInputDevice,
    K: SampleSink,
{
    let outcome = drain_loop(&mut drain, &signal, timeout, shared);

    shared.set_state(StreamState::Stopping);
    signal.canceller().cancel();
    if let Err(e) = device.stop(channel) {
        tracing::warn!(channel, error = %e, "device stop failed");
    }
    shared.set_state(StreamState::Idle);

    match outcome {
        Err(StreamError::Cancelled) | Ok(()) => {
            tracing::info!(
                channel,
                position = drain.position(),
                halves = drain.halves(),
                dropped = drain.dropped(),
                "input stream stopped"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(channel, error = %e, "input stream failed");
            Err(e)
        }
    }
}

fn drain_loop<K: SampleSink>(
    drain: &mut InputDrain<K>,
    signal: &CompletionSignal,
    timeout: Option<Duration>,
    shared: &SessionShared,
) -> StreamResult<()> {
    loop {
        let completed = signal.wait(timeout)?;
        if signal.arm() {
            shared.add_overruns(1);
            return Err(StreamError::Overrun { lost: 1 });
        }

        let outcome = drain.drain(completed);
        shared.publish(drain.position(), drain.halves());
        shared.set_dropped(drain.dropped());
        if let Err(StreamError::Overrun { lost }) = &outcome {
            shared.add_overruns(*lost);
        }
        outcome?;

        let coalesced = signal.coalesced();
        if coalesced > 0 {
            shared.set_coalesced(coalesced);
            shared.add_overruns(coalesced);
            return Err(StreamError::Overrun { lost: coalesced });
        }
        tracing::trace!(half = %completed, position = drain.position(), "forwarded");
    }
}
