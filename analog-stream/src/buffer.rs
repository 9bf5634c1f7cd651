//! Ping-pong sample buffer.
//!
//! One contiguous byte region split into two equal halves. At any instant the
//! hardware-paced side owns one half and the software side owns the other;
//! [`PingPongBuffer::swap_owner`] flips them once per completion.
//!
//! ```text
//!            capacity N
//! ┌───────────────────┬───────────────────┐
//! │  Half::First      │  Half::Second     │
//! │  [0, N/2)         │  [N/2, N)         │
//! └───────────────────┴───────────────────┘
//!   hardware-owned ◄──── swap_owner() ────► software-owned
//! ```
//!
//! The buffer holds no synchronization of its own. Ownership discipline is
//! enforced by the stream controllers that drive it.

use core::fmt;
use core::ops::Range;

use crate::error::{StreamError, StreamResult};

/// One of the two halves of a [`PingPongBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Half {
    /// Lower half, `[0, N/2)`.
    First,
    /// Upper half, `[N/2, N)`.
    Second,
}

impl Half {
    /// The opposite half.
    pub const fn other(self) -> Half {
        match self {
            Half::First => Half::Second,
            Half::Second => Half::First,
        }
    }

    /// Index of this half (0 or 1).
    pub const fn index(self) -> usize {
        match self {
            Half::First => 0,
            Half::Second => 1,
        }
    }

    /// Half for index 0 or 1; any other value maps to `None`.
    pub const fn from_index(index: usize) -> Option<Half> {
        match index {
            0 => Some(Half::First),
            1 => Some(Half::Second),
            _ => None,
        }
    }
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "half {}", self.index())
    }
}

/// Bounded view of one half: byte offset and length inside the storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfView {
    pub half: Half,
    pub offset: usize,
    pub len: usize,
}

impl HalfView {
    /// Byte range covered by this view.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Fixed-capacity byte region split into two equally sized halves.
pub struct PingPongBuffer {
    storage: Box<[u8]>,
    hardware_half: Half,
}

impl PingPongBuffer {
    /// Allocate a zeroed buffer of `capacity` bytes with the hardware
    /// owning [`Half::First`].
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidConfig`] if `capacity` is zero or odd.
    pub fn new(capacity: usize) -> StreamResult<Self> {
        if capacity == 0 {
            return Err(StreamError::invalid_config("buffer capacity must be non-zero"));
        }
        if capacity % 2 != 0 {
            return Err(StreamError::invalid_config(format!(
                "buffer capacity must be even, got {capacity}"
            )));
        }

        Ok(PingPongBuffer {
            storage: vec![0u8; capacity].into_boxed_slice(),
            hardware_half: Half::First,
        })
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Size of one half in bytes.
    pub fn half_len(&self) -> usize {
        self.storage.len() / 2
    }

    /// Offset and length of `which` inside the storage.
    ///
    /// Does not check ownership.
    pub fn half_view(&self, which: Half) -> HalfView {
        let len = self.half_len();
        HalfView {
            half: which,
            offset: which.index() * len,
            len,
        }
    }

    /// Contents of one half.
    pub fn half(&self, which: Half) -> &[u8] {
        &self.storage[self.half_view(which).range()]
    }

    /// Mutable contents of one half.
    pub fn half_mut(&mut self, which: Half) -> &mut [u8] {
        let range = self.half_view(which).range();
        &mut self.storage[range]
    }

    /// Half currently owned by the hardware-paced side.
    pub fn hardware_half(&self) -> Half {
        self.hardware_half
    }

    /// Half currently owned by the software side.
    pub fn software_half(&self) -> Half {
        self.hardware_half.other()
    }

    /// Flip ownership. Call exactly once per completion.
    ///
    /// Returns the half the hardware just vacated, which is now owned by the
    /// software side.
    pub fn swap_owner(&mut self) -> Half {
        let vacated = self.hardware_half;
        self.hardware_half = vacated.other();
        vacated
    }

    /// The whole storage, both halves.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    /// Mutable access to the whole storage.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }

    /// Release the storage, e.g. to share it with the hardware side.
    pub fn into_storage(self) -> Box<[u8]> {
        self.storage
    }
}

impl fmt::Debug for PingPongBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingPongBuffer")
            .field("capacity", &self.capacity())
            .field("hardware_half", &self.hardware_half)
            .finish()
    }
}
