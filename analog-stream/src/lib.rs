//! # analog-stream
//!
//! Gap-free streaming of sampled analog data between software and a
//! hardware-paced converter (a continuously clocked DAC or ADC), using a
//! ping-pong double buffer. Software and hardware run at their own cadence;
//! a completion per half-buffer hands ownership back and forth.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Memory | [`buffer`] | Ping-pong buffer with explicit half ownership |
//! | Sync | [`signal`] | Single-slot completion signal with cancellation |
//! | Trait | [`device`] | DAC, ADC and byte-transport collaborator traits |
//! | Strategy | [`strategy`] | Sample sources (output) and sinks (input) |
//! | Session | [`stream`] | Output and input controllers, session handles |
//! | Sim | [`sim`] | Software DAC/ADC and memory transport (feature-gated) |
//!
//! ## Quick start
//!
//! ```
//! use analog_stream::config::{ChannelSpec, StreamConfig};
//! use analog_stream::sim::SimulatedDac;
//! use analog_stream::strategy::RampSource;
//! use analog_stream::stream::{self, Strategy};
//!
//! // 4096 × u16 slots, refilled with a 0..4096 ramp forever.
//! let (dac, probe) = SimulatedDac::manual();
//! let config = StreamConfig::dac_default();
//! let session = stream::start(
//!     &ChannelSpec::dac(1, 12),
//!     &config,
//!     Strategy::output(dac, RampSource::new(4096, 2).unwrap()),
//! )
//! .unwrap();
//!
//! // The simulated clock finishes half 0; the session refills it.
//! probe.tick();
//!
//! stream::stop(session).unwrap();
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `generators` | yes | [`strategy::SineSource`] (requires `libm`) |
//! | `sim` | yes | Simulated peripherals in [`sim`] |
//!
//! ## Buffer parameters
//!
//! - **DAC buffer:** 4096 slots ([`constants::DAC_BUFFER_SAMPLES`])
//! - **ADC buffer:** 10 000 slots ([`constants::ADC_BUFFER_SAMPLES`])
//! - **Sample slot:** 2 bytes ([`constants::DEFAULT_SAMPLE_WIDTH`]), opaque to the core
//! - **Starvation timeout:** four half-periods at the trigger rate, at least
//!   1 s ([`config::StreamConfig::paced_at`])

pub mod buffer;
pub mod capture;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod signal;
pub mod strategy;
pub mod stream;

#[cfg(feature = "sim")]
pub mod sim;

pub use buffer::{Half, PingPongBuffer};
pub use capture::CapturePort;
pub use config::{ChannelSpec, StreamConfig, TransportPolicy};
pub use error::{DeviceError, SourceError, StreamError, StreamResult, TransportError};
pub use stream::{start, stop, SessionHandle, SessionStats, StopHandle, Strategy, StreamState};
