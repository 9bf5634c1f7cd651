use std::time::Duration;

/// Bytes per sample slot (12-bit converter codes stored in 16-bit words).
pub const DEFAULT_SAMPLE_WIDTH: usize = 2;

/// DAC ping-pong buffer length in samples (two halves of 2048).
pub const DAC_BUFFER_SAMPLES: usize = 4096;

/// ADC capture buffer length in samples (two halves of 5000).
pub const ADC_BUFFER_SAMPLES: usize = 10_000;

/// Default converter resolution in bits.
pub const DEFAULT_RESOLUTION_BITS: u8 = 12;

/// Widest converter resolution a channel spec may request.
pub const MAX_RESOLUTION_BITS: u8 = 32;

/// Shortest starvation timeout a config derives from its sample rate.
pub const DEFAULT_STARVATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Half-periods a controller waits for a completion before declaring
/// starvation.
pub const STARVATION_HALF_PERIODS: u32 = 4;

/// Sample clock of the simulated peripherals when none is given (1 kHz trigger).
pub const DEFAULT_SIM_SAMPLE_RATE: u32 = 1_000;
