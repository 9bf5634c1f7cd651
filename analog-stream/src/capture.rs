//! Capture region shared between an ADC and the input controller.
//!
//! The input direction is the one place where both sides touch the same
//! memory: the device writes samples straight into one half while the
//! controller forwards the other. No lock guards the storage. Instead:
//!
//! - The device reaches the region only through its [`CapturePort`], which
//!   exposes nothing but the hardware-owned half.
//! - [`CapturePort::complete`] hands the finished half to the software side by
//!   setting a lease, flips ownership, then raises the completion.
//! - The controller reads the leased half and releases it. Until then the port
//!   refuses to move back into that half: it keeps overwriting its current
//!   half and counts an overrun, which the controller reports as data loss.
//!
//! ```text
//!         port (hardware)                       controller (software)
//!  write active half ─► complete() ─► notify ─► wait ─► read leased ─► release
//!                          │ lease already held?
//!                          └─► overrun += 1, stay on current half
//! ```

use core::cell::UnsafeCell;
use core::slice;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::{Half, HalfView, PingPongBuffer};
use crate::signal::Notifier;

/// Shared form of a [`PingPongBuffer`] used for input streaming.
pub(crate) struct CaptureRegion {
    cells: Box<[UnsafeCell<u8>]>,
    half_len: usize,
    /// Index of the half the device is filling.
    hardware_half: AtomicUsize,
    /// Set while the software side holds the other half.
    leased: AtomicBool,
    overruns: AtomicU64,
}

// SAFETY: the two halves are disjoint. The port writes only the hardware-owned
// half and flips ownership only while no lease is held. The controller reads
// only the leased half. The lease handshake (Release store / Acquire load)
// orders each side's accesses before the other side may touch the same half.
unsafe impl Sync for CaptureRegion {}

impl CaptureRegion {
    pub(crate) fn new(buffer: PingPongBuffer) -> Self {
        let half_len = buffer.half_len();
        let hardware_half = buffer.hardware_half().index();
        let cells = buffer
            .into_storage()
            .into_vec()
            .into_iter()
            .map(UnsafeCell::new)
            .collect();

        CaptureRegion {
            cells,
            half_len,
            hardware_half: AtomicUsize::new(hardware_half),
            leased: AtomicBool::new(false),
            overruns: AtomicU64::new(0),
        }
    }

    pub(crate) fn half_len(&self) -> usize {
        self.half_len
    }

    pub(crate) fn half_view(&self, which: Half) -> HalfView {
        HalfView {
            half: which,
            offset: which.index() * self.half_len,
            len: self.half_len,
        }
    }

    pub(crate) fn hardware_half(&self) -> Half {
        match self.hardware_half.load(Ordering::Acquire) {
            0 => Half::First,
            _ => Half::Second,
        }
    }

    /// Half currently held by the software side, if any.
    pub(crate) fn leased_half(&self) -> Option<Half> {
        if self.leased.load(Ordering::Acquire) {
            Some(self.hardware_half().other())
        } else {
            None
        }
    }

    fn half_ptr(&self, which: Half) -> *mut u8 {
        let view = self.half_view(which);
        UnsafeCell::raw_get(self.cells[view.offset..].as_ptr())
    }

    /// Run `f` over the leased half. Returns `None` if no half is leased.
    ///
    /// Only the input controller calls this, from its single worker thread.
    pub(crate) fn read_leased<R>(&self, f: impl FnOnce(Half, &[u8]) -> R) -> Option<R> {
        let half = self.leased_half()?;
        // SAFETY: while the lease is held the port neither flips ownership nor
        // writes this half (see `CapturePort::complete`).
        let bytes = unsafe { slice::from_raw_parts(self.half_ptr(half), self.half_len) };
        Some(f(half, bytes))
    }

    /// Give the leased half back to the hardware side.
    pub(crate) fn release(&self) {
        self.leased.store(false, Ordering::Release);
    }

    /// Overruns counted since the last call.
    pub(crate) fn take_overruns(&self) -> u64 {
        self.overruns.swap(0, Ordering::AcqRel)
    }
}

/// Hardware-side handle to a capture region, handed to an
/// [`AnalogInputDevice`](crate::device::AnalogInputDevice).
///
/// A port is the only writer of the region. It exposes the half currently
/// owned by the device and nothing else.
pub struct CapturePort {
    region: Arc<CaptureRegion>,
    notifier: Notifier,
    channel: u8,
}

impl CapturePort {
    pub(crate) fn new(region: Arc<CaptureRegion>, notifier: Notifier, channel: u8) -> Self {
        CapturePort {
            region,
            notifier,
            channel,
        }
    }

    /// Channel this capture belongs to.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Bytes per half.
    pub fn half_len(&self) -> usize {
        self.region.half_len()
    }

    /// Half the device is currently filling.
    pub fn active_half(&self) -> Half {
        self.region.hardware_half()
    }

    /// Storage of the half the device is currently filling.
    pub fn active_half_mut(&mut self) -> &mut [u8] {
        let half = self.region.hardware_half();
        // SAFETY: ownership only changes in `complete(&mut self)`, which cannot
        // run while this borrow lives. The software side never reads the
        // hardware-owned half.
        unsafe { slice::from_raw_parts_mut(self.region.half_ptr(half), self.region.half_len()) }
    }

    /// Whether [`complete`](Self::complete) would move to the other half now.
    pub fn can_advance(&self) -> bool {
        !self.region.leased.load(Ordering::Acquire)
    }

    /// Mark the active half as filled.
    ///
    /// Returns `true` if ownership moved to the other half and the completion
    /// was raised. Returns `false` on overrun: the software side still holds
    /// the other half, so the device stays on its current half and the next
    /// capture overwrites it.
    pub fn complete(&mut self) -> bool {
        if self.region.leased.load(Ordering::Acquire) {
            self.region.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let finished = self.region.hardware_half();
        self.region.leased.store(true, Ordering::Release);
        self.region
            .hardware_half
            .store(finished.other().index(), Ordering::Release);
        self.notifier.notify(finished);
        true
    }

    /// Whether the session stopped listening; the device should stop.
    pub fn is_cancelled(&self) -> bool {
        self.notifier.is_cancelled()
    }
}
