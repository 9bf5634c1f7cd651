//! Error types for streaming sessions and their collaborators.
//!
//! Collaborators (devices, transports, sample sources) report their own error
//! types. The controllers wrap them into [`StreamError`] together with the
//! operation that failed, so a caller can tell a failed `configure` apart
//! from a failed `write_half` on the same device.

use std::time::Duration;

use crate::buffer::Half;

/// Failure reported by an analog output or input device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The channel id does not exist on this device.
    #[error("invalid channel {0}")]
    InvalidChannel(u8),

    /// The requested resolution is not supported by the converter.
    #[error("unsupported resolution: {0} bits")]
    UnsupportedResolution(u8),

    /// An operation was issued on a channel that was never configured.
    #[error("channel {0} is not configured")]
    NotConfigured(u8),

    /// The device is already streaming on this channel.
    #[error("channel {0} is already running")]
    AlreadyRunning(u8),

    /// A half was written while the device still holds unplayed data for it.
    #[error("channel {channel}: {half} still queued for playback")]
    HalfBusy { channel: u8, half: Half },

    /// A write did not match the negotiated half size.
    #[error("write of {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Any other driver-specific failure.
    #[error("{0}")]
    Other(String),
}

impl DeviceError {
    /// Create a driver-specific error from a message.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Failure reported by a byte-stream transport or a sample sink.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed by the remote end.
    #[error("transport closed")]
    Closed,

    /// A bounded queue in front of the transport is full.
    #[error("transport queue full ({depth} halves pending)")]
    Backpressure { depth: usize },

    /// I/O failure of the underlying writer.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport refused the data.
    #[error("transport rejected data: {0}")]
    Rejected(String),
}

/// Failure reported by a sample source while producing a chunk.
#[derive(Debug, thiserror::Error)]
#[error("sample source failed at position {position}: {reason}")]
pub struct SourceError {
    pub position: u64,
    pub reason: String,
}

impl SourceError {
    pub fn new(position: u64, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by a streaming session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Bad buffer capacity, sample width or channel spec.
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),

    /// A device operation failed.
    #[error("device {operation} failed: {source}")]
    Device {
        operation: &'static str,
        #[source]
        source: DeviceError,
    },

    /// Forwarding a captured half to the sink failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The sample source could not produce the next chunk.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The session was stopped deliberately.
    #[error("stream cancelled")]
    Cancelled,

    /// No completion arrived within the configured timeout.
    #[error("no completion within {}ms", waited.as_millis())]
    Starvation { waited: Duration },

    /// Completions were lost because the software side fell behind.
    #[error("overrun: {lost} half-buffer(s) lost")]
    Overrun { lost: u64 },

    /// The completed half differs from the one the ownership cursor expects.
    #[error("completion for {actual}, expected {expected}")]
    HalfMismatch { expected: Half, actual: Half },

    /// The worker thread could not be started.
    #[error("failed to spawn stream worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// The worker thread panicked.
    #[error("stream worker panicked")]
    WorkerPanicked,
}

impl StreamError {
    /// Wrap a device error with the operation that produced it.
    pub fn device(operation: &'static str, source: DeviceError) -> Self {
        Self::Device { operation, source }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this is the normal outcome of a deliberate stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether an input session under
    /// [`TransportPolicy::DropHalf`](crate::config::TransportPolicy::DropHalf)
    /// would skip the half and keep streaming after this error.
    ///
    /// Only transport errors qualify. This says nothing about an error
    /// returned from [`SessionHandle::join`](crate::stream::SessionHandle::join):
    /// that one has already ended its session.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_carries_operation() {
        let err = StreamError::device("configure", DeviceError::UnsupportedResolution(24));
        assert_eq!(
            err.to_string(),
            "device configure failed: unsupported resolution: 24 bits"
        );
        assert!(!err.is_droppable());
    }

    #[test]
    fn cancelled_is_not_droppable() {
        assert!(StreamError::Cancelled.is_cancelled());
        assert!(!StreamError::Cancelled.is_droppable());
    }

    #[test]
    fn transport_errors_convert() {
        let err: StreamError = TransportError::Closed.into();
        assert!(matches!(err, StreamError::Transport(TransportError::Closed)));
        assert!(err.is_droppable());
    }

    #[test]
    fn starvation_message_uses_millis() {
        let err = StreamError::Starvation {
            waited: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "no completion within 250ms");
    }

    #[test]
    fn half_mismatch_names_both_halves() {
        let err = StreamError::HalfMismatch {
            expected: Half::First,
            actual: Half::Second,
        };
        assert_eq!(err.to_string(), "completion for half 1, expected half 0");
    }
}
