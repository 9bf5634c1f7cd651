//! DAC ramp: output streaming to a simulated DAC.
//!
//! Preloads a 4096-slot buffer with a rising ramp (or a sine) and keeps the
//! DAC fed half by half until Ctrl-C or `--seconds` elapses.
//!
//! ```text
//!   RampSource / SineSource ──► OutputPump ──► SimulatedDac (free-running clock)
//! ```

use std::thread;
use std::time::{Duration, Instant};

use analog_stream::config::{ChannelSpec, StreamConfig};
use analog_stream::constants::{
    DAC_BUFFER_SAMPLES, DEFAULT_RESOLUTION_BITS, DEFAULT_SIM_SAMPLE_RATE,
};
use analog_stream::sim::SimulatedDac;
use analog_stream::strategy::{RampSource, SampleSource, SineSource};
use analog_stream::stream::{self, Strategy};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Waveform {
    Ramp,
    Sine,
}

#[derive(Debug, Parser)]
#[command(about = "Stream a ramp or sine to a simulated DAC")]
struct Args {
    /// Signal to play.
    #[arg(long, value_enum, default_value_t = Waveform::Ramp)]
    waveform: Waveform,

    /// DAC channel.
    #[arg(long, default_value_t = 1)]
    channel: u8,

    /// Converter resolution in bits.
    #[arg(long, default_value_t = DEFAULT_RESOLUTION_BITS)]
    resolution: u8,

    /// Trigger rate in samples per second.
    #[arg(long, default_value_t = DEFAULT_SIM_SAMPLE_RATE)]
    sample_rate: u32,

    /// Buffer length in samples (split into two halves).
    #[arg(long, default_value_t = DAC_BUFFER_SAMPLES)]
    capacity: usize,

    /// Sine frequency in Hz.
    #[arg(long, default_value_t = 5.0)]
    frequency: f64,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<f64>,

    /// Progress report interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    report_ms: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StreamConfig::dac_default()
        .with_capacity(args.capacity)
        .paced_at(args.sample_rate);
    let channel = ChannelSpec::dac(args.channel, args.resolution);

    // The ramp period equals the buffer length: slot i always holds i.
    let source: Box<dyn SampleSource> = match args.waveform {
        Waveform::Ramp => Box::new(RampSource::new(config.capacity as u64, config.sample_width)?),
        Waveform::Sine => Box::new(SineSource::new(
            args.frequency,
            args.sample_rate,
            0.9,
            args.resolution,
            config.sample_width,
        )?),
    };

    let (dac, probe) = SimulatedDac::free_running(args.sample_rate, config.sample_width);
    let session = stream::start(&channel, &config, Strategy::output(dac, source))
        .context("start output stream")?;

    let stopper = session.stop_handle();
    ctrlc::set_handler(move || stopper.stop()).context("install Ctrl-C handler")?;

    let started = Instant::now();
    let deadline = args.seconds.map(|s| started + Duration::from_secs_f64(s));
    let stopper = session.stop_handle();
    while !session.is_finished() && !stopper.is_stopped() {
        thread::sleep(Duration::from_millis(args.report_ms));
        let stats = session.stats();
        tracing::info!(
            position = stats.position,
            halves = stats.halves,
            played = probe.halves_played(),
            underruns = probe.underruns(),
            "streaming"
        );
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    let stats = session.stats();
    session.stop().context("output stream failed")?;
    tracing::info!(
        position = stats.position,
        halves = stats.halves,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "done"
    );
    Ok(())
}
