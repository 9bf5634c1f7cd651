//! Channel and session configuration.
//!
//! ```
//! use analog_stream::config::{ChannelSpec, StreamConfig, TransportPolicy};
//! use std::time::Duration;
//!
//! let channel = ChannelSpec::dac(1, 12);
//! let config = StreamConfig::dac_default()
//!     .with_starvation_timeout(Some(Duration::from_millis(500)))
//!     .with_transport_policy(TransportPolicy::Abort);
//!
//! assert!(channel.validate().is_ok());
//! assert_eq!(config.buffer_bytes().unwrap(), 8192);
//! ```

use std::time::Duration;

use crate::constants::{
    ADC_BUFFER_SAMPLES, DAC_BUFFER_SAMPLES, DEFAULT_RESOLUTION_BITS, DEFAULT_SAMPLE_WIDTH,
    DEFAULT_SIM_SAMPLE_RATE, DEFAULT_STARVATION_TIMEOUT, MAX_RESOLUTION_BITS,
    STARVATION_HALF_PERIODS,
};
use crate::error::{StreamError, StreamResult};

/// Configuration of one converter channel, handed to the device as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel identifier on the device.
    pub channel_id: u8,
    /// Converter resolution in bits.
    pub resolution: u8,
    /// Pace conversions from an external hardware trigger.
    pub enable_hw_trigger: bool,
}

impl ChannelSpec {
    /// Output channel paced by a hardware trigger.
    pub const fn dac(channel_id: u8, resolution: u8) -> Self {
        ChannelSpec {
            channel_id,
            resolution,
            enable_hw_trigger: true,
        }
    }

    /// Input channel sampling continuously.
    pub const fn adc(channel_id: u8, resolution: u8) -> Self {
        ChannelSpec {
            channel_id,
            resolution,
            enable_hw_trigger: false,
        }
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.resolution == 0 || self.resolution > MAX_RESOLUTION_BITS {
            return Err(StreamError::invalid_config(format!(
                "resolution must be 1..={MAX_RESOLUTION_BITS} bits, got {}",
                self.resolution
            )));
        }
        Ok(())
    }
}

impl Default for ChannelSpec {
    fn default() -> Self {
        ChannelSpec::dac(1, DEFAULT_RESOLUTION_BITS)
    }
}

/// What an input session does when its sink fails to accept a half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPolicy {
    /// Stop the session and report the transport error.
    #[default]
    Abort,
    /// Drop the half, log and count it, keep streaming.
    DropHalf,
}

/// Session parameters shared by output and input streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Buffer length in sample slots. Must be even.
    pub capacity: usize,
    /// Bytes per sample slot.
    pub sample_width: usize,
    /// Longest wait for a completion before the session fails with
    /// starvation. `None` waits forever.
    pub starvation_timeout: Option<Duration>,
    /// Sink failure handling for input sessions.
    pub transport_policy: TransportPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::dac_default()
    }
}

impl StreamConfig {
    /// A config with `capacity` sample slots and otherwise default values.
    pub fn new(capacity: usize) -> Self {
        StreamConfig {
            capacity,
            sample_width: DEFAULT_SAMPLE_WIDTH,
            starvation_timeout: Some(DEFAULT_STARVATION_TIMEOUT),
            transport_policy: TransportPolicy::Abort,
        }
    }

    /// 4096 × 16-bit slots, two halves of 2048, paced for a 1 kHz trigger.
    pub fn dac_default() -> Self {
        Self::new(DAC_BUFFER_SAMPLES).paced_at(DEFAULT_SIM_SAMPLE_RATE)
    }

    /// 10000 × 16-bit slots, two halves of 5000, paced for a 1 kHz trigger.
    pub fn adc_default() -> Self {
        Self::new(ADC_BUFFER_SAMPLES).paced_at(DEFAULT_SIM_SAMPLE_RATE)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_sample_width(mut self, sample_width: usize) -> Self {
        self.sample_width = sample_width;
        self
    }

    pub fn with_starvation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.starvation_timeout = timeout;
        self
    }

    pub fn with_transport_policy(mut self, policy: TransportPolicy) -> Self {
        self.transport_policy = policy;
        self
    }

    /// Derive the starvation timeout from the converter's sample rate:
    /// [`STARVATION_HALF_PERIODS`] half-periods, never less than
    /// [`DEFAULT_STARVATION_TIMEOUT`]. A rate of zero leaves it unchanged.
    ///
    /// The timeout follows the capacity at the time of the call, so set the
    /// capacity first.
    pub fn paced_at(mut self, sample_rate: u32) -> Self {
        if let Some(period) = self.half_period(sample_rate) {
            let timeout = period.saturating_mul(STARVATION_HALF_PERIODS);
            self.starvation_timeout = Some(timeout.max(DEFAULT_STARVATION_TIMEOUT));
        }
        self
    }

    /// Samples per half.
    pub fn half_samples(&self) -> usize {
        self.capacity / 2
    }

    /// Time the converter takes to play or capture one half at
    /// `sample_rate`, or `None` for a rate of zero.
    pub fn half_period(&self, sample_rate: u32) -> Option<Duration> {
        if sample_rate == 0 {
            return None;
        }
        let nanos = self.half_samples() as u128 * 1_000_000_000 / u128::from(sample_rate);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Buffer size in bytes.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidConfig`] if the config does not validate.
    pub fn buffer_bytes(&self) -> StreamResult<usize> {
        self.validate()?;
        self.capacity
            .checked_mul(self.sample_width)
            .ok_or_else(|| StreamError::invalid_config("buffer size overflows usize"))
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.capacity == 0 || self.capacity % 2 != 0 {
            return Err(StreamError::invalid_config(format!(
                "capacity must be a non-zero even number of samples, got {}",
                self.capacity
            )));
        }
        if self.sample_width == 0 {
            return Err(StreamError::invalid_config("sample width must be non-zero"));
        }
        if self.starvation_timeout == Some(Duration::ZERO) {
            return Err(StreamError::invalid_config(
                "starvation timeout must be non-zero; use None to wait forever",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_buffer_constants() {
        let dac = StreamConfig::dac_default();
        assert_eq!(dac.capacity, 4096);
        assert_eq!(dac.half_samples(), 2048);
        assert_eq!(dac.buffer_bytes().unwrap(), 8192);

        let adc = StreamConfig::adc_default();
        assert_eq!(adc.half_samples(), 5000);
        assert_eq!(adc.buffer_bytes().unwrap(), 20_000);
    }

    #[test]
    fn presets_outlast_a_half_at_the_default_rate() {
        for config in [StreamConfig::dac_default(), StreamConfig::adc_default()] {
            let period = config.half_period(DEFAULT_SIM_SAMPLE_RATE).unwrap();
            assert!(config.starvation_timeout.unwrap() > period);
        }
        assert_eq!(
            StreamConfig::dac_default().starvation_timeout,
            Some(Duration::from_millis(8192))
        );
        assert_eq!(
            StreamConfig::adc_default().starvation_timeout,
            Some(Duration::from_secs(20))
        );
    }

    #[test]
    fn pacing_follows_rate_and_capacity() {
        let config = StreamConfig::new(64).paced_at(8);
        assert_eq!(config.half_period(8), Some(Duration::from_secs(4)));
        assert_eq!(config.starvation_timeout, Some(Duration::from_secs(16)));

        // Fast converters keep the floor.
        let fast = StreamConfig::new(64).paced_at(1_000_000);
        assert_eq!(fast.starvation_timeout, Some(DEFAULT_STARVATION_TIMEOUT));

        let unpaced = StreamConfig::new(64).with_starvation_timeout(None).paced_at(0);
        assert_eq!(unpaced.starvation_timeout, None);
        assert_eq!(unpaced.half_period(0), None);
    }

    #[test]
    fn odd_or_zero_capacity_is_invalid() {
        for capacity in [0, 1, 4095] {
            let config = StreamConfig::new(capacity);
            assert!(matches!(config.validate(), Err(StreamError::InvalidConfig(_))));
        }
    }

    #[test]
    fn zero_width_is_invalid() {
        let config = StreamConfig::new(8).with_sample_width(0);
        assert!(config.buffer_bytes().is_err());
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = StreamConfig::new(8).with_starvation_timeout(Some(Duration::ZERO));
        assert!(config.validate().is_err());
        assert!(config.with_starvation_timeout(None).validate().is_ok());
    }

    #[test]
    fn channel_resolution_bounds() {
        assert!(ChannelSpec::dac(1, 12).validate().is_ok());
        assert!(ChannelSpec::adc(0, 32).validate().is_ok());
        assert!(ChannelSpec::adc(0, 0).validate().is_err());
        assert!(ChannelSpec::dac(1, 33).validate().is_err());
    }

    #[test]
    fn dac_channels_use_hw_trigger() {
        assert!(ChannelSpec::dac(1, 12).enable_hw_trigger);
        assert!(!ChannelSpec::adc(3, 12).enable_hw_trigger);
    }
}
