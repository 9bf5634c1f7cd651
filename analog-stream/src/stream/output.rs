//! Output streaming: software fills, the DAC drains.
//!
//! ```text
//! prime:   source(0)    → half 0 ─┐
//!          source(N/2)  → half 1 ─┴─► write_half ×2 ─► start_continuous
//! loop:    wait ─► arm ─► swap_owner ─► source(pos + N) → vacated half
//!               ─► write_half ─► pos += N/2
//! ```
//!
//! The half just vacated will be played after the one the DAC is on now, so
//! its content starts one whole buffer past the current position.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::buffer::{Half, PingPongBuffer};
use crate::config::{ChannelSpec, StreamConfig};
use crate::device::AnalogOutputDevice;
use crate::error::{StreamError, StreamResult};
use crate::signal::CompletionSignal;
use crate::strategy::SampleSource;

use super::{Direction, SessionHandle, SessionShared, StreamState};

/// Steady-state steps of an output session, without threads.
///
/// Owns the buffer and the source. Positions are in sample slots.
pub struct OutputPump<S> {
    buffer: PingPongBuffer,
    source: S,
    channel: u8,
    half_samples: u64,
    capacity_samples: u64,
    position: u64,
    halves: u64,
}

impl<S: SampleSource> OutputPump<S> {
    /// Allocate the buffer for `config`.
    pub fn new(config: &StreamConfig, channel: u8, source: S) -> StreamResult<Self> {
        let buffer = PingPongBuffer::new(config.buffer_bytes()?)?;
        Ok(OutputPump {
            buffer,
            source,
            channel,
            half_samples: config.half_samples() as u64,
            capacity_samples: config.capacity as u64,
            position: 0,
            halves: 0,
        })
    }

    /// Fill both halves and hand them to the device, half 0 first.
    pub fn prime<D: AnalogOutputDevice + ?Sized>(&mut self, device: &mut D) -> StreamResult<()> {
        for half in [Half::First, Half::Second] {
            let start = half.index() as u64 * self.half_samples;
            self.source.fill(start, self.buffer.half_mut(half))?;
            device
                .write_half(self.channel, self.buffer.half(half))
                .map_err(|e| StreamError::device("write_half", e))?;
        }
        tracing::debug!(channel = self.channel, "output buffer primed");
        Ok(())
    }

    /// Refill the half the device just finished playing.
    ///
    /// # Errors
    ///
    /// [`StreamError::HalfMismatch`] if `completed` is not the half the
    /// ownership cursor says the device was playing.
    pub fn refill<D: AnalogOutputDevice + ?Sized>(
        &mut self,
        completed: Half,
        device: &mut D,
    ) -> StreamResult<()> {
        let vacated = self.buffer.swap_owner();
        if vacated != completed {
            return Err(StreamError::HalfMismatch {
                expected: vacated,
                actual: completed,
            });
        }

        let next = self.position.wrapping_add(self.capacity_samples);
        self.source.fill(next, self.buffer.half_mut(vacated))?;
        device
            .write_half(self.channel, self.buffer.half(vacated))
            .map_err(|e| StreamError::device("write_half", e))?;

        self.position = self.position.wrapping_add(self.half_samples);
        self.halves += 1;
        Ok(())
    }

    /// Sample slots consumed by the device so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Halves refilled so far.
    pub fn halves(&self) -> u64 {
        self.halves
    }

    pub fn buffer(&self) -> &PingPongBuffer {
        &self.buffer
    }
}

/// Bring up an output session and spawn its controller.
pub(crate) fn spawn<D, S>(
    channel: &ChannelSpec,
    config: &StreamConfig,
    mut device: D,
    source: S,
) -> StreamResult<SessionHandle>
where
    D: AnalogOutputDevice + 'static,
    S: SampleSource + 'static,
{
    let shared = Arc::new(SessionShared::new(Direction::Output, channel.channel_id));

    let (pump, signal) = match bring_up(&shared, channel, config, &mut device, source) {
        Ok(started) => started,
        Err(e) => {
            shared.set_state(StreamState::Idle);
            tracing::error!(
                channel = channel.channel_id,
                error = %e,
                "output stream failed to start"
            );
            return Err(e);
        }
    };

    shared.set_state(StreamState::Streaming);
    tracing::info!(
        channel = channel.channel_id,
        capacity = config.capacity,
        sample_width = config.sample_width,
        "output stream running"
    );

    let canceller = signal.canceller();
    let worker_shared = Arc::clone(&shared);
    let timeout = config.starvation_timeout;
    let spawned = thread::Builder::new()
        .name("analog-stream-out".into())
        .spawn(move || run(pump, device, signal, timeout, &worker_shared));

    match spawned {
        Ok(worker) => Ok(SessionHandle::new(shared, canceller, worker)),
        Err(e) => {
            // The device went down with the closure; make sure nothing
            // notifies into a dead session.
            canceller.cancel();
            shared.set_state(StreamState::Idle);
            Err(StreamError::Spawn(e))
        }
    }
}

fn bring_up<D, S>(
    shared: &SessionShared,
    channel: &ChannelSpec,
    config: &StreamConfig,
    device: &mut D,
    source: S,
) -> StreamResult<(OutputPump<S>, CompletionSignal)>
where
    D: AnalogOutputDevice,
    S: SampleSource,
{
    config.validate()?;
    channel.validate()?;

    shared.set_state(StreamState::Configuring);
    device
        .configure(channel)
        .map_err(|e| StreamError::device("configure", e))?;

    shared.set_state(StreamState::Priming);
    let mut pump = OutputPump::new(config, channel.channel_id, source)?;
    pump.prime(device)?;

    let signal = CompletionSignal::new();
    device
        .start_continuous(channel.channel_id, signal.notifier())
        .map_err(|e| StreamError::device("start_continuous", e))?;
    Ok((pump, signal))
}

fn run<D, S>(
    mut pump: OutputPump<S>,
    mut device: D,
    signal: CompletionSignal,
    timeout: Option<Duration>,
    shared: &SessionShared,
) -> StreamResult<()>
where
    D: AnalogOutputDevice,
    S: SampleSource,
{
    let outcome = pump_loop(&mut pump, &mut device, &signal, timeout, shared);

    shared.set_state(StreamState::Stopping);
    signal.canceller().cancel();
    if let Err(e) = device.stop(pump.channel) {
        tracing::warn!(channel = pump.channel, error = %e, "device stop failed");
    }
    shared.set_state(StreamState::Idle);

    match outcome {
        Err(StreamError::Cancelled) | Ok(()) => {
            tracing::info!(
                channel = pump.channel,
                position = pump.position(),
                halves = pump.halves(),
                "output stream stopped"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(channel = pump.channel, error = %e, "output stream failed");
            Err(e)
        }
    }
}

fn pump_loop<D, S>(
    pump: &mut OutputPump<S>,
    device: &mut D,
    signal: &CompletionSignal,
    timeout: Option<Duration>,
    shared: &SessionShared,
) -> StreamResult<()>
where
    D: AnalogOutputDevice,
    S: SampleSource,
{
    loop {
        let completed = signal.wait(timeout)?;
        if signal.arm() {
            shared.add_overruns(1);
            return Err(StreamError::Overrun { lost: 1 });
        }

        // Any merged completion is a half the DAC played without a refill.
        let lost = signal.coalesced();
        if lost > 0 {
            shared.set_coalesced(lost);
            shared.add_overruns(lost);
            tracing::warn!(lost, "completions coalesced");
            return Err(StreamError::Overrun { lost });
        }

        pump.refill(completed, device)?;
        shared.publish(pump.position(), pump.halves());
        tracing::trace!(half = %completed, position = pump.position(), "refilled");
    }
}
