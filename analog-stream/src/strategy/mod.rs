//! Software-side strategies plugged into a stream session.
//!
//! | Direction | Trait | Provided |
//! |-----------|-------|----------|
//! | Output | [`SampleSource`] | [`RampSource`], [`SineSource`], [`FnSource`] |
//! | Input | [`SampleSink`] | [`TransportSink`], [`QueuedSink`], [`FnSink`] |
//!
//! Sources are addressed by absolute sample position, so a chunk's content
//! depends only on where it lands in the stream and never on call history.

pub mod sink;
pub mod source;

pub use sink::{FnSink, QueuedSink, SampleSink, TransportSink};
#[cfg(feature = "generators")]
pub use source::SineSource;
pub use source::{FnSource, RampSource, SampleSource};

/// Store `value` little-endian into a slot of `slot.len()` bytes (at most 8).
pub(crate) fn write_slot(slot: &mut [u8], value: u64) {
    let bytes = value.to_le_bytes();
    slot.copy_from_slice(&bytes[..slot.len()]);
}
