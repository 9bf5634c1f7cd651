//! Simulated ADC.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::CapturePort;
use crate::config::ChannelSpec;
use crate::device::AnalogInputDevice;
use crate::error::DeviceError;
use crate::strategy::SampleSource;

use super::{half_period, SIM_CHANNELS, SIM_MAX_RESOLUTION};

#[derive(Default)]
struct AdcState {
    channel: Option<ChannelSpec>,
    port: Option<CapturePort>,
    halves_captured: u64,
    overruns: u64,
}

struct AdcInner {
    state: Mutex<AdcState>,
    changed: Condvar,
}

impl AdcInner {
    fn lock(&self) -> MutexGuard<'_, AdcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&AdcState) -> bool,
    ) -> MutexGuard<'_, AdcState> {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| !ready(state))
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }

    /// Fill the active half with `bytes` and complete it.
    fn capture(&self, bytes: &[u8]) -> Result<bool, DeviceError> {
        let mut state = self.lock();
        let channel = state.channel.map_or(0, |c| c.channel_id);
        let port = state
            .port
            .as_mut()
            .ok_or(DeviceError::NotConfigured(channel))?;

        if bytes.len() != port.half_len() {
            return Err(DeviceError::LengthMismatch {
                expected: port.half_len(),
                actual: bytes.len(),
            });
        }
        port.active_half_mut().copy_from_slice(bytes);
        let moved = port.complete();

        state.halves_captured += 1;
        if !moved {
            state.overruns += 1;
        }
        self.changed.notify_all();
        Ok(moved)
    }
}

enum Clock {
    Manual,
    FreeRunning {
        sample_rate: u32,
        sample_width: usize,
        source: Option<Box<dyn SampleSource>>,
    },
}

/// An ADC that captures whatever its probe or its signal source feeds it.
pub struct SimulatedAdc {
    inner: Arc<AdcInner>,
    clock: Clock,
    clock_thread: Option<JoinHandle<()>>,
}

impl SimulatedAdc {
    fn with_clock(clock: Clock) -> (Self, AdcProbe) {
        let inner = Arc::new(AdcInner {
            state: Mutex::new(AdcState::default()),
            changed: Condvar::new(),
        });
        let probe = AdcProbe {
            inner: Arc::clone(&inner),
        };
        (
            SimulatedAdc {
                inner,
                clock,
                clock_thread: None,
            },
            probe,
        )
    }

    /// An ADC that captures one half per [`AdcProbe::capture`] call.
    pub fn manual() -> (Self, AdcProbe) {
        Self::with_clock(Clock::Manual)
    }

    /// An ADC sampling `source` at `sample_rate` on its own clock thread.
    ///
    /// The source is addressed by absolute sample slot, as for output.
    pub fn free_running(
        sample_rate: u32,
        sample_width: usize,
        source: impl SampleSource + 'static,
    ) -> (Self, AdcProbe) {
        Self::with_clock(Clock::FreeRunning {
            sample_rate,
            sample_width,
            source: Some(Box::new(source)),
        })
    }

    fn halt(&mut self) {
        // Dropping the port ends the clock thread's next capture.
        drop(self.inner.lock().port.take());
        self.inner.changed.notify_all();
        if let Some(handle) = self.clock_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("simulated ADC clock thread panicked");
            }
        }
    }
}

impl AnalogInputDevice for SimulatedAdc {
    fn configure(&mut self, channel: &ChannelSpec) -> Result<(), DeviceError> {
        if channel.channel_id >= SIM_CHANNELS {
            return Err(DeviceError::InvalidChannel(channel.channel_id));
        }
        if channel.resolution > SIM_MAX_RESOLUTION {
            return Err(DeviceError::UnsupportedResolution(channel.resolution));
        }
        self.inner.lock().channel = Some(*channel);
        Ok(())
    }

    fn start_async_capture(&mut self, port: CapturePort) -> Result<(), DeviceError> {
        let channel = port.channel();
        let half_len = port.half_len();
        {
            let mut state = self.inner.lock();
            match state.channel {
                Some(spec) if spec.channel_id == channel => {}
                _ => return Err(DeviceError::NotConfigured(channel)),
            }
            if state.port.is_some() {
                return Err(DeviceError::AlreadyRunning(channel));
            }
            state.port = Some(port);
            self.inner.changed.notify_all();
        }

        if let Clock::FreeRunning {
            sample_rate,
            sample_width,
            source,
        } = &mut self.clock
        {
            let mut source = source
                .take()
                .ok_or_else(|| DeviceError::other("signal source already consumed"))?;
            let period = half_period(half_len, *sample_width, *sample_rate);
            let samples_per_half = (half_len / (*sample_width).max(1)) as u64;
            let inner = Arc::clone(&self.inner);

            let handle = thread::Builder::new()
                .name("sim-adc-clock".into())
                .spawn(move || {
                    let mut scratch = vec![0u8; half_len];
                    let mut position = 0u64;
                    let mut next = Instant::now() + period;
                    loop {
                        if let Err(e) = source.fill(position, &mut scratch) {
                            tracing::error!(error = %e, "simulated ADC signal failed");
                            break;
                        }
                        // `halt` takes the port and wakes us early.
                        let wait = next.saturating_duration_since(Instant::now());
                        if inner.wait_until(wait, |s| s.port.is_none()).port.is_none() {
                            break;
                        }
                        if inner.capture(&scratch).is_err() {
                            break;
                        }
                        position = position.wrapping_add(samples_per_half);
                        next += period;
                    }
                })
                .map_err(|e| DeviceError::other(format!("clock thread: {e}")))?;
            self.clock_thread = Some(handle);
        }

        tracing::debug!(channel, "simulated ADC capturing");
        Ok(())
    }

    fn stop(&mut self, channel: u8) -> Result<(), DeviceError> {
        self.halt();
        tracing::debug!(channel, "simulated ADC stopped");
        Ok(())
    }
}

impl Drop for SimulatedAdc {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Test and demo handle onto a [`SimulatedAdc`].
#[derive(Clone)]
pub struct AdcProbe {
    inner: Arc<AdcInner>,
}

impl AdcProbe {
    /// Capture one half of `bytes`.
    ///
    /// Returns `Ok(false)` on overrun: the software side still held the
    /// other half, so this capture stays in the current half.
    ///
    /// # Errors
    ///
    /// [`DeviceError::NotConfigured`] if capture is not running,
    /// [`DeviceError::LengthMismatch`] if `bytes` is not one half long.
    pub fn capture(&self, bytes: &[u8]) -> Result<bool, DeviceError> {
        self.inner.capture(bytes)
    }

    /// Wait until capture is running, up to `timeout`.
    pub fn wait_running(&self, timeout: Duration) -> bool {
        self.inner
            .wait_until(timeout, |s| s.port.is_some())
            .port
            .is_some()
    }

    /// Wait until the software side has released its half, so the next
    /// capture moves on instead of overrunning. `false` on timeout or when
    /// capture is not running.
    pub fn wait_released(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.lock().port.as_ref().map(CapturePort::can_advance) {
                Some(true) => return true,
                None => return false,
                Some(false) => {}
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().port.is_some()
    }

    pub fn halves_captured(&self) -> u64 {
        self.inner.lock().halves_captured
    }

    /// Captures that could not move to the other half.
    pub fn overruns(&self) -> u64 {
        self.inner.lock().overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Half, PingPongBuffer};
    use crate::capture::CaptureRegion;
    use crate::signal::CompletionSignal;
    use crate::strategy::RampSource;

    fn port_for(
        capacity: usize,
        channel: u8,
    ) -> (Arc<CaptureRegion>, CapturePort, CompletionSignal) {
        let region = Arc::new(CaptureRegion::new(PingPongBuffer::new(capacity).unwrap()));
        let signal = CompletionSignal::new();
        let port = CapturePort::new(Arc::clone(&region), signal.notifier(), channel);
        (region, port, signal)
    }

    #[test]
    fn capture_requires_running_port() {
        let (_adc, probe) = SimulatedAdc::manual();
        assert!(matches!(
            probe.capture(&[1, 2]),
            Err(DeviceError::NotConfigured(_))
        ));
    }

    #[test]
    fn start_requires_matching_channel() {
        let (mut adc, _probe) = SimulatedAdc::manual();
        adc.configure(&ChannelSpec::adc(0, 12)).unwrap();
        let (_region, port, _signal) = port_for(4, 1);
        assert!(matches!(
            adc.start_async_capture(port),
            Err(DeviceError::NotConfigured(1))
        ));
    }

    #[test]
    fn captures_alternate_halves() {
        let (mut adc, probe) = SimulatedAdc::manual();
        adc.configure(&ChannelSpec::adc(0, 12)).unwrap();
        let (region, port, signal) = port_for(4, 0);
        adc.start_async_capture(port).unwrap();
        assert!(probe.is_running());

        assert!(probe.capture(&[1, 2]).unwrap());
        assert_eq!(signal.wait(None).unwrap(), Half::First);
        region.release();

        assert!(probe.capture(&[3, 4]).unwrap());
        assert_eq!(signal.wait(None).unwrap(), Half::Second);
        let seen = region.read_leased(|_, bytes| bytes.to_vec()).unwrap();
        assert_eq!(seen, vec![3, 4]);

        // Still leased: the next capture overruns.
        assert!(!probe.capture(&[5, 6]).unwrap());
        assert_eq!(probe.overruns(), 1);
        assert_eq!(probe.halves_captured(), 3);
    }

    #[test]
    fn rejects_wrong_length() {
        let (mut adc, probe) = SimulatedAdc::manual();
        adc.configure(&ChannelSpec::adc(0, 12)).unwrap();
        let (_region, port, _signal) = port_for(4, 0);
        adc.start_async_capture(port).unwrap();
        assert!(matches!(
            probe.capture(&[1, 2, 3]),
            Err(DeviceError::LengthMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn free_running_samples_source() {
        let ramp = RampSource::new(256, 1).unwrap();
        let (mut adc, probe) = SimulatedAdc::free_running(1000, 1, ramp);
        adc.configure(&ChannelSpec::adc(0, 8)).unwrap();
        let (region, port, signal) = port_for(8, 0);
        adc.start_async_capture(port).unwrap();

        assert_eq!(signal.wait(Some(Duration::from_secs(2))).unwrap(), Half::First);
        let seen = region.read_leased(|_, bytes| bytes.to_vec()).unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        region.release();

        adc.stop(0).unwrap();
        assert!(!probe.is_running());
    }

    #[test]
    fn stop_interrupts_a_long_half() {
        // Four samples per half at 1 Hz.
        let ramp = RampSource::new(256, 1).unwrap();
        let (mut adc, probe) = SimulatedAdc::free_running(1, 1, ramp);
        adc.configure(&ChannelSpec::adc(0, 8)).unwrap();
        let (_region, port, _signal) = port_for(8, 0);
        adc.start_async_capture(port).unwrap();
        assert!(probe.wait_running(Duration::from_secs(1)));

        let started = Instant::now();
        adc.stop(0).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(probe.halves_captured(), 0);
    }
}
