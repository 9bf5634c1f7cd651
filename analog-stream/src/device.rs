//! Collaborator interfaces consumed by the stream controllers.
//!
//! | Trait | Role |
//! |-------|------|
//! | [`AnalogOutputDevice`] | Continuously clocked DAC fed one half at a time |
//! | [`AnalogInputDevice`] | Continuously clocked ADC filling a [`CapturePort`] |
//! | [`ByteTransport`] | Downstream byte sink for captured data (UART, USB CDC, file, ...) |
//!
//! Register programming, clocking and trigger setup live behind these traits.

use std::io::Write;

use crate::capture::CapturePort;
use crate::config::ChannelSpec;
use crate::error::{DeviceError, TransportError};
use crate::signal::Notifier;

/// A DAC that plays half-buffers back to back at its sample clock.
///
/// The device keeps its own copy of the two halves handed to it with
/// [`write_half`](Self::write_half), alternating between half 0 and half 1,
/// and raises one completion on the [`Notifier`] each time it finishes
/// playing a half.
pub trait AnalogOutputDevice: Send {
    /// Configure the channel. Called once, before anything else.
    fn configure(&mut self, channel: &ChannelSpec) -> Result<(), DeviceError>;

    /// Queue the next half-buffer of samples for `channel`.
    fn write_half(&mut self, channel: u8, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Start continuous playback. Completions are reported on `notifier`.
    fn start_continuous(&mut self, channel: u8, notifier: Notifier) -> Result<(), DeviceError>;

    /// Stop playback on `channel`.
    fn stop(&mut self, channel: u8) -> Result<(), DeviceError> {
        let _ = channel;
        Ok(())
    }
}

/// An ADC that captures continuously into a ping-pong region.
///
/// The device must fill the port's active half and call
/// [`CapturePort::complete`] exactly once per half-buffer-worth of samples,
/// starting with half 0.
pub trait AnalogInputDevice: Send {
    /// Configure the channel. Called once, before anything else.
    fn configure(&mut self, channel: &ChannelSpec) -> Result<(), DeviceError>;

    /// Begin continuous capture into `port`.
    fn start_async_capture(&mut self, port: CapturePort) -> Result<(), DeviceError>;

    /// Stop capturing on `channel` and release the port.
    fn stop(&mut self, channel: u8) -> Result<(), DeviceError> {
        let _ = channel;
        Ok(())
    }
}

/// Destination of captured bytes. `send` may block until all bytes are taken.
pub trait ByteTransport: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

impl<T: AnalogOutputDevice + ?Sized> AnalogOutputDevice for Box<T> {
    fn configure(&mut self, channel: &ChannelSpec) -> Result<(), DeviceError> {
        (**self).configure(channel)
    }

    fn write_half(&mut self, channel: u8, bytes: &[u8]) -> Result<(), DeviceError> {
        (**self).write_half(channel, bytes)
    }

    fn start_continuous(&mut self, channel: u8, notifier: Notifier) -> Result<(), DeviceError> {
        (**self).start_continuous(channel, notifier)
    }

    fn stop(&mut self, channel: u8) -> Result<(), DeviceError> {
        (**self).stop(channel)
    }
}

impl<T: AnalogInputDevice + ?Sized> AnalogInputDevice for Box<T> {
    fn configure(&mut self, channel: &ChannelSpec) -> Result<(), DeviceError> {
        (**self).configure(channel)
    }

    fn start_async_capture(&mut self, port: CapturePort) -> Result<(), DeviceError> {
        (**self).start_async_capture(port)
    }

    fn stop(&mut self, channel: u8) -> Result<(), DeviceError> {
        (**self).stop(channel)
    }
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }
}

/// Adapts any [`Write`] into a [`ByteTransport`].
///
/// Partial writes are retried until every byte is accepted, then the writer
/// is flushed so each half leaves the process promptly.
pub struct WriteTransport<W> {
    writer: W,
}

impl<W: Write + Send> WriteTransport<W> {
    pub fn new(writer: W) -> Self {
        WriteTransport { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ByteTransport for WriteTransport<W> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }
}
