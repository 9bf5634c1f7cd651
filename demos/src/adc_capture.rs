//! ADC capture: input streaming from a simulated ADC to stdout or a file.
//!
//! The simulated ADC samples a sine at the trigger rate into a 10 000-slot
//! buffer. Each finished half is sent, in full, to the output. With
//! `--queue-depth` the writes move to their own thread behind a bounded
//! queue.
//!
//! ```text
//!   SineSource ──► SimulatedAdc ──► InputDrain ──► [QueuedSink] ──► file / stdout
//! ```
//!
//! Logs go to stderr so stdout carries only sample bytes.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use analog_stream::config::{ChannelSpec, StreamConfig, TransportPolicy};
use analog_stream::constants::{
    ADC_BUFFER_SAMPLES, DEFAULT_RESOLUTION_BITS, DEFAULT_SIM_SAMPLE_RATE,
};
use analog_stream::device::WriteTransport;
use analog_stream::sim::SimulatedAdc;
use analog_stream::strategy::{QueuedSink, SampleSink, SineSource, TransportSink};
use analog_stream::stream::{self, Strategy};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// Stop on the first failed write.
    Abort,
    /// Drop the half and keep capturing.
    Drop,
}

impl From<Policy> for TransportPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Abort => TransportPolicy::Abort,
            Policy::Drop => TransportPolicy::DropHalf,
        }
    }
}

#[derive(Debug, Parser)]
#[command(about = "Capture a simulated ADC channel to a byte stream")]
struct Args {
    /// Write samples here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// ADC channel.
    #[arg(long, default_value_t = 0)]
    channel: u8,

    /// Converter resolution in bits.
    #[arg(long, default_value_t = DEFAULT_RESOLUTION_BITS)]
    resolution: u8,

    /// Trigger rate in samples per second.
    #[arg(long, default_value_t = DEFAULT_SIM_SAMPLE_RATE)]
    sample_rate: u32,

    /// Buffer length in samples (split into two halves).
    #[arg(long, default_value_t = ADC_BUFFER_SAMPLES)]
    capacity: usize,

    /// Frequency of the simulated input signal in Hz.
    #[arg(long, default_value_t = 2.0)]
    frequency: f64,

    /// Queue up to this many halves in front of the output.
    #[arg(long)]
    queue_depth: Option<usize>,

    /// What to do when the output refuses a half.
    #[arg(long, value_enum, default_value_t = Policy::Abort)]
    policy: Policy,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    seconds: Option<f64>,
}

fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn Write + Send>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StreamConfig::adc_default()
        .with_capacity(args.capacity)
        .paced_at(args.sample_rate)
        .with_transport_policy(args.policy.into());
    let channel = ChannelSpec::adc(args.channel, args.resolution);

    let transport = WriteTransport::new(open_output(args.output.as_ref())?);
    let sink: Box<dyn SampleSink> = match args.queue_depth {
        Some(depth) => Box::new(QueuedSink::spawn(transport, depth).context("spawn sink thread")?),
        None => Box::new(TransportSink::new(transport)),
    };

    let signal = SineSource::new(
        args.frequency,
        args.sample_rate,
        0.8,
        args.resolution,
        config.sample_width,
    )?;
    let (adc, probe) = SimulatedAdc::free_running(args.sample_rate, config.sample_width, signal);
    let session = stream::start(&channel, &config, Strategy::input(adc, sink))
        .context("start input stream")?;

    let stopper = session.stop_handle();
    ctrlc::set_handler(move || stopper.stop()).context("install Ctrl-C handler")?;

    let started = Instant::now();
    let deadline = args.seconds.map(|s| started + Duration::from_secs_f64(s));
    let stopper = session.stop_handle();
    while !session.is_finished() && !stopper.is_stopped() {
        thread::sleep(Duration::from_millis(200));
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    let stats = session.stats();
    session.stop().context("input stream failed")?;
    tracing::info!(
        position = stats.position,
        halves = stats.halves,
        dropped = stats.dropped,
        captured = probe.halves_captured(),
        overruns = probe.overruns(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "done"
    );
    Ok(())
}
