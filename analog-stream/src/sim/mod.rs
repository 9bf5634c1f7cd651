//! Software peripherals for tests and demos.
//!
//! These honour the same contracts as real converters: one completion per
//! half, strict alternation starting at half 0, and no waiting on the
//! software side. Each device runs either on a manual clock, stepped through
//! a probe handle, or on a free-running clock thread at a fixed sample rate.
//!
//! | Device | Probe | Stands in for |
//! |--------|-------|---------------|
//! | [`SimulatedDac`] | [`DacProbe`] | DAC with a two-half DMA queue |
//! | [`SimulatedAdc`] | [`AdcProbe`] | ADC with continuous DMA capture |
//! | [`MemoryTransport`] | (clone) | UART / USB CDC byte sink |

mod adc;
mod dac;
mod transport;

pub use adc::{AdcProbe, SimulatedAdc};
pub use dac::{DacProbe, SimulatedDac};
pub use transport::MemoryTransport;

use std::time::Duration;

/// Highest converter resolution the simulated devices accept.
pub const SIM_MAX_RESOLUTION: u8 = 16;

/// Number of channels on each simulated device.
pub const SIM_CHANNELS: u8 = 2;

/// Time the hardware needs to play or capture one half.
pub(crate) fn half_period(half_len: usize, sample_width: usize, sample_rate: u32) -> Duration {
    let samples = (half_len / sample_width.max(1)) as f64;
    Duration::from_secs_f64(samples / f64::from(sample_rate.max(1)))
}
