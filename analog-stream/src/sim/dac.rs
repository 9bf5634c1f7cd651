//! Simulated DAC.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::Half;
use crate::config::ChannelSpec;
use crate::device::AnalogOutputDevice;
use crate::error::DeviceError;
use crate::signal::Notifier;

use super::{half_period, SIM_CHANNELS, SIM_MAX_RESOLUTION};

/// Bytes of playback history kept for inspection.
const HISTORY_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
enum Clock {
    Manual,
    FreeRunning { sample_rate: u32, sample_width: usize },
}

#[derive(Default)]
struct DacState {
    channel: Option<ChannelSpec>,
    half_len: Option<usize>,
    queued: [Option<Vec<u8>>; 2],
    write_cursor: Option<Half>,
    play_cursor: Option<Half>,
    played: Vec<u8>,
    halves_played: u64,
    underruns: u64,
    notifier: Option<Notifier>,
    running: bool,
}

struct DacInner {
    state: Mutex<DacState>,
    changed: Condvar,
}

impl DacInner {
    fn lock(&self) -> MutexGuard<'_, DacState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&DacState) -> bool,
    ) -> MutexGuard<'_, DacState> {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| !ready(state))
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }

    /// Play one half: the hardware clock reached the end of it.
    fn tick(&self) -> Option<Half> {
        let mut state = self.lock();
        if !state.running {
            return None;
        }

        let half = state.play_cursor.unwrap_or(Half::First);
        let half_len = state.half_len.unwrap_or(0);
        match state.queued[half.index()].take() {
            Some(bytes) => state.played.extend_from_slice(&bytes),
            None => {
                state.underruns += 1;
                let len = state.played.len();
                state.played.resize(len + half_len, 0);
            }
        }
        if state.played.len() > HISTORY_LIMIT {
            let excess = state.played.len() - HISTORY_LIMIT;
            state.played.drain(..excess);
        }

        state.halves_played += 1;
        state.play_cursor = Some(half.other());
        if let Some(notifier) = &state.notifier {
            notifier.notify(half);
        }
        self.changed.notify_all();
        Some(half)
    }
}

/// A DAC that plays the halves queued with `write_half` back to back.
///
/// ```
/// use analog_stream::sim::SimulatedDac;
///
/// let (dac, probe) = SimulatedDac::manual();
/// assert_eq!(probe.halves_played(), 0);
/// # drop(dac);
/// ```
pub struct SimulatedDac {
    inner: Arc<DacInner>,
    clock: Clock,
    clock_thread: Option<JoinHandle<()>>,
}

impl SimulatedDac {
    fn with_clock(clock: Clock) -> (Self, DacProbe) {
        let inner = Arc::new(DacInner {
            state: Mutex::new(DacState::default()),
            changed: Condvar::new(),
        });
        let probe = DacProbe {
            inner: Arc::clone(&inner),
        };
        (
            SimulatedDac {
                inner,
                clock,
                clock_thread: None,
            },
            probe,
        )
    }

    /// A DAC whose clock only advances through [`DacProbe::tick`].
    pub fn manual() -> (Self, DacProbe) {
        Self::with_clock(Clock::Manual)
    }

    /// A DAC clocked by its own thread at `sample_rate` samples per second.
    pub fn free_running(sample_rate: u32, sample_width: usize) -> (Self, DacProbe) {
        Self::with_clock(Clock::FreeRunning {
            sample_rate,
            sample_width,
        })
    }

    fn check_channel(state: &DacState, channel: u8) -> Result<(), DeviceError> {
        match state.channel {
            Some(spec) if spec.channel_id == channel => Ok(()),
            _ => Err(DeviceError::NotConfigured(channel)),
        }
    }

    fn halt(&mut self) {
        {
            let mut state = self.inner.lock();
            state.running = false;
            state.notifier = None;
            self.inner.changed.notify_all();
        }
        if let Some(handle) = self.clock_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("simulated DAC clock thread panicked");
            }
        }
    }
}

impl AnalogOutputDevice for SimulatedDac {
    fn configure(&mut self, channel: &ChannelSpec) -> Result<(), DeviceError> {
        if channel.channel_id >= SIM_CHANNELS {
            return Err(DeviceError::InvalidChannel(channel.channel_id));
        }
        if channel.resolution > SIM_MAX_RESOLUTION {
            return Err(DeviceError::UnsupportedResolution(channel.resolution));
        }
        let mut state = self.inner.lock();
        state.channel = Some(*channel);
        Ok(())
    }

    fn write_half(&mut self, channel: u8, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut state = self.inner.lock();
        Self::check_channel(&state, channel)?;

        match state.half_len {
            Some(expected) if expected != bytes.len() => {
                return Err(DeviceError::LengthMismatch {
                    expected,
                    actual: bytes.len(),
                });
            }
            Some(_) => {}
            None => state.half_len = Some(bytes.len()),
        }

        let half = state.write_cursor.unwrap_or(Half::First);
        if state.queued[half.index()].is_some() {
            return Err(DeviceError::HalfBusy { channel, half });
        }
        state.queued[half.index()] = Some(bytes.to_vec());
        state.write_cursor = Some(half.other());
        self.inner.changed.notify_all();
        Ok(())
    }

    fn start_continuous(&mut self, channel: u8, notifier: Notifier) -> Result<(), DeviceError> {
        let half_len = {
            let mut state = self.inner.lock();
            Self::check_channel(&state, channel)?;
            if state.running {
                return Err(DeviceError::AlreadyRunning(channel));
            }
            state.notifier = Some(notifier);
            state.running = true;
            self.inner.changed.notify_all();
            state.half_len
        };

        if let Clock::FreeRunning {
            sample_rate,
            sample_width,
        } = self.clock
        {
            let half_len = half_len.ok_or_else(|| {
                DeviceError::other("free-running DAC started with nothing queued")
            })?;
            let period = half_period(half_len, sample_width, sample_rate);
            let inner = Arc::clone(&self.inner);

            let handle = thread::Builder::new()
                .name("sim-dac-clock".into())
                .spawn(move || {
                    let mut next = Instant::now() + period;
                    loop {
                        // `halt` clears `running` and wakes us early.
                        let wait = next.saturating_duration_since(Instant::now());
                        if !inner.wait_until(wait, |s| !s.running).running {
                            break;
                        }
                        if inner.tick().is_none() {
                            break;
                        }
                        next += period;
                    }
                })
                .map_err(|e| DeviceError::other(format!("clock thread: {e}")))?;
            self.clock_thread = Some(handle);
        }

        tracing::debug!(channel, "simulated DAC running");
        Ok(())
    }

    fn stop(&mut self, channel: u8) -> Result<(), DeviceError> {
        Self::check_channel(&self.inner.lock(), channel)?;
        self.halt();
        tracing::debug!(channel, "simulated DAC stopped");
        Ok(())
    }
}

impl Drop for SimulatedDac {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Test and demo handle onto a [`SimulatedDac`].
#[derive(Clone)]
pub struct DacProbe {
    inner: Arc<DacInner>,
}

impl DacProbe {
    /// Advance the clock by one half. Returns the half that finished playing,
    /// or `None` if the DAC is not running.
    pub fn tick(&self) -> Option<Half> {
        self.inner.tick()
    }

    /// Everything played so far (most recent history only).
    pub fn played(&self) -> Vec<u8> {
        self.inner.lock().played.clone()
    }

    /// Contents queued for `half`, if not played yet.
    pub fn queued(&self, half: Half) -> Option<Vec<u8>> {
        self.inner.lock().queued[half.index()].clone()
    }

    /// Wait until `half` has data queued, up to `timeout`.
    pub fn wait_queued(&self, half: Half, timeout: Duration) -> Option<Vec<u8>> {
        let state = self
            .inner
            .wait_until(timeout, |s| s.queued[half.index()].is_some());
        state.queued[half.index()].clone()
    }

    /// Wait until at least `count` halves were played, up to `timeout`.
    pub fn wait_played(&self, count: u64, timeout: Duration) -> bool {
        self.inner
            .wait_until(timeout, |s| s.halves_played >= count)
            .halves_played
            >= count
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn halves_played(&self) -> u64 {
        self.inner.lock().halves_played
    }

    /// Halves the clock reached with nothing queued; played as silence.
    pub fn underruns(&self) -> u64 {
        self.inner.lock().underruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CompletionSignal;

    fn configured() -> (SimulatedDac, DacProbe) {
        let (mut dac, probe) = SimulatedDac::manual();
        dac.configure(&ChannelSpec::dac(1, 12)).unwrap();
        (dac, probe)
    }

    #[test]
    fn rejects_bad_channel_and_resolution() {
        let (mut dac, _probe) = SimulatedDac::manual();
        assert!(matches!(
            dac.configure(&ChannelSpec::dac(7, 12)),
            Err(DeviceError::InvalidChannel(7))
        ));
        assert!(matches!(
            dac.configure(&ChannelSpec::dac(1, 24)),
            Err(DeviceError::UnsupportedResolution(24))
        ));
    }

    #[test]
    fn write_requires_configuration() {
        let (mut dac, _probe) = SimulatedDac::manual();
        assert!(matches!(
            dac.write_half(1, &[0, 0]),
            Err(DeviceError::NotConfigured(1))
        ));
    }

    #[test]
    fn plays_halves_in_order_and_notifies() {
        let (mut dac, probe) = configured();
        let signal = CompletionSignal::new();

        dac.write_half(1, &[1, 2]).unwrap();
        dac.write_half(1, &[3, 4]).unwrap();
        dac.start_continuous(1, signal.notifier()).unwrap();

        assert_eq!(probe.tick(), Some(Half::First));
        assert_eq!(signal.wait(None).unwrap(), Half::First);
        dac.write_half(1, &[5, 6]).unwrap();

        assert_eq!(probe.tick(), Some(Half::Second));
        assert_eq!(signal.wait(None).unwrap(), Half::Second);
        assert_eq!(probe.tick(), Some(Half::First));

        assert_eq!(probe.played(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(probe.underruns(), 0);
    }

    #[test]
    fn refuses_to_overwrite_unplayed_half() {
        let (mut dac, _probe) = configured();
        dac.write_half(1, &[1, 2]).unwrap();
        dac.write_half(1, &[3, 4]).unwrap();
        assert!(matches!(
            dac.write_half(1, &[5, 6]),
            Err(DeviceError::HalfBusy {
                channel: 1,
                half: Half::First
            })
        ));
    }

    #[test]
    fn rejects_length_change() {
        let (mut dac, _probe) = configured();
        dac.write_half(1, &[1, 2]).unwrap();
        assert!(matches!(
            dac.write_half(1, &[1, 2, 3]),
            Err(DeviceError::LengthMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn empty_half_plays_silence() {
        let (mut dac, probe) = configured();
        let signal = CompletionSignal::new();
        dac.write_half(1, &[9, 9]).unwrap();
        dac.start_continuous(1, signal.notifier()).unwrap();

        probe.tick();
        probe.tick();
        assert_eq!(probe.played(), vec![9, 9, 0, 0]);
        assert_eq!(probe.underruns(), 1);
    }

    #[test]
    fn stop_halts_the_clock() {
        let (mut dac, probe) = configured();
        let signal = CompletionSignal::new();
        dac.write_half(1, &[1, 1]).unwrap();
        dac.start_continuous(1, signal.notifier()).unwrap();
        assert!(matches!(
            dac.start_continuous(1, signal.notifier()),
            Err(DeviceError::AlreadyRunning(1))
        ));

        dac.stop(1).unwrap();
        assert!(!probe.is_running());
        assert_eq!(probe.tick(), None);
    }

    #[test]
    fn free_running_clock_plays_on_its_own() {
        let (mut dac, probe) = SimulatedDac::free_running(1000, 1);
        dac.configure(&ChannelSpec::dac(0, 8)).unwrap();
        let signal = CompletionSignal::new();
        dac.write_half(0, &[1; 4]).unwrap();
        dac.write_half(0, &[2; 4]).unwrap();
        dac.start_continuous(0, signal.notifier()).unwrap();

        assert_eq!(signal.wait(Some(Duration::from_secs(2))).unwrap(), Half::First);
        assert!(probe.wait_played(1, Duration::from_secs(2)));
        dac.stop(0).unwrap();
    }

    #[test]
    fn stop_interrupts_a_long_half() {
        // One byte per second: each half lasts 4 s.
        let (mut dac, probe) = SimulatedDac::free_running(1, 1);
        dac.configure(&ChannelSpec::dac(0, 8)).unwrap();
        let signal = CompletionSignal::new();
        dac.write_half(0, &[1; 4]).unwrap();
        dac.start_continuous(0, signal.notifier()).unwrap();

        let started = Instant::now();
        dac.stop(0).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(probe.halves_played(), 0);
    }
}
