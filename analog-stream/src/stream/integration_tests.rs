//! Full sessions against the simulated peripherals.
//!
//! Each test drives a real session (worker thread, completion signal,
//! device) and steps the simulated hardware clock by hand, so every
//! completion happens at a known point:
//!
//! ```text
//! output: RampSource → OutputPump → SimulatedDac ◄── DacProbe::tick()
//! input:  AdcProbe::capture() → SimulatedAdc → InputDrain → sink
//! ```

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::buffer::Half;
    use crate::config::{ChannelSpec, StreamConfig, TransportPolicy};
    use crate::constants::DEFAULT_SIM_SAMPLE_RATE;
    use crate::error::{DeviceError, SourceError, StreamError, TransportError};
    use crate::sim::{MemoryTransport, SimulatedAdc, SimulatedDac};
    use crate::strategy::{FnSink, FnSource, RampSource, SampleSource, TransportSink};
    use crate::stream::{self, Direction, Strategy, StreamState};

    const PATIENCE: Duration = Duration::from_secs(2);

    fn wait_until(cond: impl FnMut() -> bool) -> bool {
        wait_for(PATIENCE, cond)
    }

    fn wait_for(patience: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + patience;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    /// 1, 2, 3, ... by absolute position.
    fn counting() -> impl SampleSource {
        FnSource::new(|position, chunk: &mut [u8]| {
            for (i, b) in chunk.iter_mut().enumerate() {
                *b = (position + i as u64 + 1) as u8;
            }
            Ok::<(), SourceError>(())
        })
    }

    fn bytes_config(capacity: usize) -> StreamConfig {
        StreamConfig::new(capacity).with_sample_width(1)
    }

    // ---------------------------------------------------------------
    // Output
    // ---------------------------------------------------------------

    #[test]
    fn output_primes_both_halves_then_refills_half_zero() {
        let (dac, probe) = SimulatedDac::manual();
        let session = stream::start(
            &ChannelSpec::dac(1, 8),
            &bytes_config(8),
            Strategy::output(dac, counting()),
        )
        .unwrap();

        assert_eq!(session.direction(), Direction::Output);
        assert_eq!(session.state(), StreamState::Streaming);
        assert_eq!(probe.queued(Half::First), Some(vec![1, 2, 3, 4]));
        assert_eq!(probe.queued(Half::Second), Some(vec![5, 6, 7, 8]));
        assert!(probe.is_running());

        assert_eq!(probe.tick(), Some(Half::First));
        assert_eq!(
            probe.wait_queued(Half::First, PATIENCE),
            Some(vec![9, 10, 11, 12])
        );
        assert!(wait_until(|| session.stats().halves == 1));
        assert_eq!(session.position(), 4);
        assert_eq!(probe.played(), vec![1, 2, 3, 4]);

        stream::stop(session).unwrap();
        assert!(!probe.is_running());
    }

    #[test]
    fn output_plays_an_unbroken_ramp() {
        let (dac, probe) = SimulatedDac::manual();
        let config = StreamConfig::new(16).with_sample_width(2);
        let session = stream::start(
            &ChannelSpec::dac(1, 12),
            &config,
            Strategy::output(dac, RampSource::new(4096, 2).unwrap()),
        )
        .unwrap();

        for k in 1..=9u64 {
            probe.tick();
            assert!(wait_until(|| session.stats().halves == k));
            assert_eq!(session.position(), k * 8);
        }

        let played: Vec<u16> = probe
            .played()
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        let expected: Vec<u16> = (0..9 * 8).collect();
        assert_eq!(played, expected);
        assert_eq!(probe.underruns(), 0);

        session.stop().unwrap();
    }

    #[test]
    fn output_free_running_clock() {
        // 32 samples per half at 1 kHz: a refill has 32ms of slack.
        let (dac, probe) = SimulatedDac::free_running(1_000, 1);
        let session = stream::start(
            &ChannelSpec::dac(0, 8),
            &bytes_config(64),
            Strategy::output(dac, RampSource::new(256, 1).unwrap()),
        )
        .unwrap();

        assert!(probe.wait_played(4, PATIENCE));
        session.stop().unwrap();

        let played = probe.played();
        let expected: Vec<u8> = (0..played.len()).map(|i| i as u8).collect();
        assert_eq!(played, expected);
        assert_eq!(probe.underruns(), 0);
    }

    #[test]
    fn output_source_failure_ends_session() {
        let (dac, probe) = SimulatedDac::manual();
        let source = FnSource::new(|position, chunk: &mut [u8]| {
            if position >= 8 {
                return Err(SourceError::new(position, "end of table"));
            }
            chunk.fill(1);
            Ok(())
        });
        let session = stream::start(
            &ChannelSpec::dac(1, 8),
            &bytes_config(8).with_starvation_timeout(None),
            Strategy::output(dac, source),
        )
        .unwrap();

        probe.tick();
        let err = session.join().unwrap_err();
        assert!(matches!(err, StreamError::Source(ref e) if e.position == 8));
        assert!(!probe.is_running());
    }

    // ---------------------------------------------------------------
    // Input
    // ---------------------------------------------------------------

    #[test]
    fn input_forwards_halves_in_capture_order() {
        let (adc, probe) = SimulatedAdc::manual();
        let transport = MemoryTransport::new();
        let session = stream::start(
            &ChannelSpec::adc(0, 12),
            &bytes_config(4),
            Strategy::input(adc, TransportSink::new(transport.clone())),
        )
        .unwrap();
        assert_eq!(session.direction(), Direction::Input);
        assert!(probe.wait_running(PATIENCE));

        assert!(probe.capture(b"ab").unwrap());
        assert!(probe.wait_released(PATIENCE));
        assert_eq!(transport.contents(), b"ab".to_vec());

        assert!(probe.capture(b"cd").unwrap());
        assert!(probe.wait_released(PATIENCE));
        assert_eq!(transport.contents(), b"abcd".to_vec());

        assert!(wait_until(|| session.position() == 4));
        session.stop().unwrap();
        assert!(!probe.is_running());
    }

    #[test]
    fn input_alternates_halves_over_many_captures() {
        let (adc, probe) = SimulatedAdc::manual();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        let session = stream::start(
            &ChannelSpec::adc(1, 12),
            &bytes_config(6),
            Strategy::input(
                adc,
                FnSink::new(move |half: &[u8]| {
                    sink_received.lock().unwrap().push(half.to_vec());
                    Ok(())
                }),
            ),
        )
        .unwrap();

        for n in 0..10u8 {
            assert!(probe.capture(&[n, n, n]).unwrap());
            assert!(probe.wait_released(PATIENCE));
        }
        assert!(wait_until(|| session.stats().halves == 10));
        session.stop().unwrap();

        let expected: Vec<Vec<u8>> = (0..10u8).map(|n| vec![n; 3]).collect();
        assert_eq!(*received.lock().unwrap(), expected);
    }

    #[test]
    fn slow_sink_causes_reported_overrun() {
        let (adc, probe) = SimulatedAdc::manual();
        let (open_tx, open_rx) = crossbeam_channel::unbounded::<()>();
        let session = stream::start(
            &ChannelSpec::adc(0, 12),
            &bytes_config(4),
            Strategy::input(
                adc,
                FnSink::new(move |_: &[u8]| {
                    open_rx.recv().map_err(|_| TransportError::Closed)?;
                    Ok(())
                }),
            ),
        )
        .unwrap();

        assert!(probe.capture(b"ab").unwrap());
        // The sink holds half 0; this capture has nowhere to go.
        assert!(!probe.capture(b"cd").unwrap());
        assert_eq!(probe.overruns(), 1);

        open_tx.send(()).unwrap();
        let err = session.join().unwrap_err();
        assert!(matches!(err, StreamError::Overrun { lost: 1 }));
    }

    #[test]
    fn drop_policy_keeps_streaming() {
        let (adc, probe) = SimulatedAdc::manual();
        let transport = MemoryTransport::new();
        transport.fail_next(1);
        let session = stream::start(
            &ChannelSpec::adc(0, 12),
            &bytes_config(4).with_transport_policy(TransportPolicy::DropHalf),
            Strategy::input(adc, TransportSink::new(transport.clone())),
        )
        .unwrap();

        assert!(probe.capture(b"ab").unwrap());
        assert!(probe.wait_released(PATIENCE));
        assert!(probe.capture(b"cd").unwrap());
        assert!(probe.wait_released(PATIENCE));

        assert!(wait_until(|| session.stats().halves == 1));
        let stats = session.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.position, 2);
        assert_eq!(transport.contents(), b"cd".to_vec());
        assert_eq!(session.state(), StreamState::Streaming);
        session.stop().unwrap();
    }

    #[test]
    fn abort_policy_stops_on_sink_error() {
        let (adc, probe) = SimulatedAdc::manual();
        let transport = MemoryTransport::new();
        transport.fail_next(1);
        let session = stream::start(
            &ChannelSpec::adc(0, 12),
            &bytes_config(4),
            Strategy::input(adc, TransportSink::new(transport)),
        )
        .unwrap();

        assert!(probe.capture(b"ab").unwrap());
        let err = session.join().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Transport(TransportError::Rejected(_))
        ));
        assert!(!probe.is_running());
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    #[test]
    fn stop_unblocks_a_waiting_controller() {
        let (dac, _probe) = SimulatedDac::manual();
        let session = stream::start(
            &ChannelSpec::dac(1, 8),
            &bytes_config(8).with_starvation_timeout(None),
            Strategy::output(dac, counting()),
        )
        .unwrap();
        let stopper = session.stop_handle();

        let started = Instant::now();
        let remote = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.stop();
        });
        session.join().unwrap();
        remote.join().unwrap();
        assert!(started.elapsed() < PATIENCE);
    }

    #[test]
    fn output_starves_without_completions() {
        let (dac, probe) = SimulatedDac::manual();
        let config = bytes_config(8).with_starvation_timeout(Some(Duration::from_millis(30)));
        let session = stream::start(
            &ChannelSpec::dac(1, 8),
            &config,
            Strategy::output(dac, counting()),
        )
        .unwrap();
        assert!(probe.is_running());

        let err = session.join().unwrap_err();
        assert!(matches!(
            err,
            StreamError::Starvation { waited } if waited == Duration::from_millis(30)
        ));
        assert!(!probe.is_running());
        assert_eq!(probe.halves_played(), 0);
    }

    #[test]
    fn missing_completions_starve_the_session() {
        let (adc, probe) = SimulatedAdc::manual();
        let config = bytes_config(4).with_starvation_timeout(Some(Duration::from_millis(30)));
        let session = stream::start(
            &ChannelSpec::adc(0, 12),
            &config,
            Strategy::input(adc, FnSink::new(|_: &[u8]| Ok(()))),
        )
        .unwrap();

        let err = session.join().unwrap_err();
        assert!(matches!(err, StreamError::Starvation { .. }));
        assert!(!probe.is_running());
    }

    #[test]
    fn configure_failure_returns_device_error() {
        let (dac, probe) = SimulatedDac::manual();
        let err = stream::start(
            &ChannelSpec::dac(9, 12),
            &bytes_config(8),
            Strategy::output(dac, counting()),
        )
        .err()
        .unwrap();

        assert!(matches!(
            err,
            StreamError::Device {
                operation: "configure",
                source: DeviceError::InvalidChannel(9)
            }
        ));
        assert!(!probe.is_running());
        assert_eq!(probe.queued(Half::First), None);
    }

    #[test]
    fn invalid_config_never_touches_the_device() {
        let (adc, probe) = SimulatedAdc::manual();
        let err = stream::start(
            &ChannelSpec::adc(0, 12),
            &StreamConfig::new(5),
            Strategy::input(adc, FnSink::new(|_: &[u8]| Ok(()))),
        )
        .err()
        .unwrap();

        assert!(matches!(err, StreamError::InvalidConfig(_)));
        assert!(!probe.is_running());
    }

    #[test]
    fn dropping_the_handle_stops_the_device() {
        let (dac, probe) = SimulatedDac::manual();
        let session = stream::start(
            &ChannelSpec::dac(1, 8),
            &bytes_config(8),
            Strategy::output(dac, counting()),
        )
        .unwrap();
        assert!(probe.is_running());

        drop(session);
        assert!(!probe.is_running());
        assert_eq!(probe.tick(), None);
    }

    // ---------------------------------------------------------------
    // Presets at the default trigger rate
    // ---------------------------------------------------------------

    #[test]
    fn dac_preset_survives_the_first_half() {
        let config = StreamConfig::dac_default();
        let (dac, probe) =
            SimulatedDac::free_running(DEFAULT_SIM_SAMPLE_RATE, config.sample_width);
        let session = stream::start(
            &ChannelSpec::dac(1, 12),
            &config,
            Strategy::output(dac, RampSource::new(4096, config.sample_width).unwrap()),
        )
        .unwrap();

        // 2048 samples at 1 kHz: the first refill comes after about 2 s.
        assert!(wait_for(Duration::from_secs(6), || session.stats().halves >= 1));
        assert_eq!(session.state(), StreamState::Streaming);

        // The next half is still seconds away.
        let started = Instant::now();
        session.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!probe.is_running());
        assert_eq!(probe.underruns(), 0);
    }

    #[test]
    fn adc_preset_survives_the_first_half() {
        let config = StreamConfig::adc_default();
        let signal = RampSource::new(4096, config.sample_width).unwrap();
        let (adc, probe) =
            SimulatedAdc::free_running(DEFAULT_SIM_SAMPLE_RATE, config.sample_width, signal);
        let transport = MemoryTransport::new();
        let session = stream::start(
            &ChannelSpec::adc(0, 12),
            &config,
            Strategy::input(adc, TransportSink::new(transport.clone())),
        )
        .unwrap();

        // 5000 samples at 1 kHz: the first half arrives after about 5 s.
        assert!(wait_for(Duration::from_secs(12), || session.stats().halves >= 1));
        assert_eq!(session.state(), StreamState::Streaming);
        assert!(transport.contents().len() >= 10_000);

        let started = Instant::now();
        session.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!probe.is_running());
    }
}
