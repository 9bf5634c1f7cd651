//! Sample sources for output streaming.

use crate::error::{SourceError, StreamError, StreamResult};

use super::write_slot;

/// Produces the samples an output session plays.
pub trait SampleSource: Send {
    /// Fill `chunk` with the samples starting at absolute slot `position`.
    ///
    /// `chunk` is always exactly one half-buffer long.
    fn fill(&mut self, position: u64, chunk: &mut [u8]) -> Result<(), SourceError>;
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn fill(&mut self, position: u64, chunk: &mut [u8]) -> Result<(), SourceError> {
        (**self).fill(position, chunk)
    }
}

/// Source backed by a closure.
///
/// ```
/// use analog_stream::strategy::{FnSource, SampleSource};
///
/// let mut source = FnSource::new(|position, chunk: &mut [u8]| {
///     for (i, b) in chunk.iter_mut().enumerate() {
///         *b = (position as usize + i) as u8;
///     }
///     Ok(())
/// });
/// let mut chunk = [0u8; 4];
/// source.fill(8, &mut chunk).unwrap();
/// assert_eq!(chunk, [8, 9, 10, 11]);
/// ```
pub struct FnSource<F> {
    f: F,
}

impl<F> FnSource<F>
where
    F: FnMut(u64, &mut [u8]) -> Result<(), SourceError> + Send,
{
    pub fn new(f: F) -> Self {
        FnSource { f }
    }
}

impl<F> SampleSource for FnSource<F>
where
    F: FnMut(u64, &mut [u8]) -> Result<(), SourceError> + Send,
{
    fn fill(&mut self, position: u64, chunk: &mut [u8]) -> Result<(), SourceError> {
        (self.f)(position, chunk)
    }
}

fn check_width(sample_width: usize) -> StreamResult<()> {
    if sample_width == 0 || sample_width > 8 {
        return Err(StreamError::invalid_config(format!(
            "sample width must be 1..=8 bytes, got {sample_width}"
        )));
    }
    Ok(())
}

fn check_chunk(position: u64, chunk: &[u8], sample_width: usize) -> Result<(), SourceError> {
    if chunk.len() % sample_width != 0 {
        return Err(SourceError::new(
            position,
            format!(
                "chunk of {} bytes is not a whole number of {sample_width}-byte samples",
                chunk.len()
            ),
        ));
    }
    Ok(())
}

/// Rising ramp: slot `n` holds `n % period`.
///
/// With a period equal to the buffer length this reproduces a buffer
/// preloaded with `0, 1, 2, ...` and refilled in place forever.
#[derive(Debug, Clone)]
pub struct RampSource {
    period: u64,
    sample_width: usize,
}

impl RampSource {
    /// Ramp wrapping every `period` samples, stored in `sample_width` bytes.
    pub fn new(period: u64, sample_width: usize) -> StreamResult<Self> {
        check_width(sample_width)?;
        if period == 0 {
            return Err(StreamError::invalid_config("ramp period must be non-zero"));
        }
        Ok(RampSource {
            period,
            sample_width,
        })
    }

    pub fn value_at(&self, slot: u64) -> u64 {
        slot % self.period
    }
}

impl SampleSource for RampSource {
    fn fill(&mut self, position: u64, chunk: &mut [u8]) -> Result<(), SourceError> {
        check_chunk(position, chunk, self.sample_width)?;
        for (i, slot) in chunk.chunks_exact_mut(self.sample_width).enumerate() {
            write_slot(slot, self.value_at(position.wrapping_add(i as u64)));
        }
        Ok(())
    }
}

/// Sine wave in unsigned converter codes centred at mid-scale.
#[cfg(feature = "generators")]
#[derive(Debug, Clone)]
pub struct SineSource {
    frequency: f64,
    sample_rate: f64,
    amplitude: f64,
    full_scale: f64,
    sample_width: usize,
}

#[cfg(feature = "generators")]
impl SineSource {
    /// `frequency` Hz at `sample_rate` Hz, for a `resolution`-bit converter.
    /// `amplitude` is clamped to 0.0..=1.0 of half scale.
    pub fn new(
        frequency: f64,
        sample_rate: u32,
        amplitude: f64,
        resolution: u8,
        sample_width: usize,
    ) -> StreamResult<Self> {
        check_width(sample_width)?;
        if sample_rate == 0 {
            return Err(StreamError::invalid_config("sample rate must be non-zero"));
        }
        if resolution == 0 || resolution > 32 || usize::from(resolution) > sample_width * 8 {
            return Err(StreamError::invalid_config(format!(
                "{resolution}-bit codes do not fit {sample_width}-byte samples"
            )));
        }

        Ok(SineSource {
            frequency,
            sample_rate: f64::from(sample_rate),
            amplitude: amplitude.clamp(0.0, 1.0),
            full_scale: ((1u64 << resolution) - 1) as f64,
            sample_width,
        })
    }

    /// Converter code for absolute slot `slot`.
    pub fn code_at(&self, slot: u64) -> u64 {
        let cycles = slot as f64 * self.frequency / self.sample_rate;
        let phase = cycles - libm::floor(cycles);
        let mid = self.full_scale / 2.0;
        let value = mid + libm::sin(2.0 * core::f64::consts::PI * phase) * self.amplitude * mid;
        libm::round(value).clamp(0.0, self.full_scale) as u64
    }
}

#[cfg(feature = "generators")]
impl SampleSource for SineSource {
    fn fill(&mut self, position: u64, chunk: &mut [u8]) -> Result<(), SourceError> {
        check_chunk(position, chunk, self.sample_width)?;
        for (i, slot) in chunk.chunks_exact_mut(self.sample_width).enumerate() {
            write_slot(slot, self.code_at(position.wrapping_add(i as u64)));
        }
        Ok(())
    }
}
