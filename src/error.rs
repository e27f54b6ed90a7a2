//! Error types for `otacom`.
//!
//! Per-target failures (refused connections, fatal device responses, unexpected
//! disconnects) are *outcomes*, not errors. The errors below are the ones that
//! prevent a flashing session from running at all, or abort it as a whole.

use std::{fmt, io, path::PathBuf, time::Duration};

// =============================================================================
// Public Interface
// =============================================================================

pub type Result<T> = std::result::Result<T, FlashError>;

/// Errors that abort a flashing session.
#[derive(Debug)]
pub enum FlashError {
    /// I/O error from the multiplexer or the operating system.
    Io(io::Error),

    /// The firmware image could not be read.
    FirmwareRead { path: PathBuf, source: io::Error },

    /// The firmware image does not fit in the 32 bit length of a request frame.
    FirmwareTooLarge { size: u64 },

    /// There was nothing to flash.
    NoTargets,

    /// The multiplexer timed out while connections were still pending.
    Stalled { pending: usize, timeout: Duration },
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::Io(err) => write!(f, "I/O error: {}", err),
            FlashError::FirmwareRead { path, source } => {
                write!(f, "cannot read firmware `{}`: {}", path.display(), source)
            }
            FlashError::FirmwareTooLarge { size } => write!(
                f,
                "firmware is {} bytes, the protocol allows at most {} bytes",
                size,
                u32::MAX
            ),
            FlashError::NoTargets => write!(f, "no target to flash"),
            FlashError::Stalled { pending, timeout } => write!(
                f,
                "no activity for {:?} with {} connection(s) still pending",
                timeout, pending
            ),
        }
    }
}

impl std::error::Error for FlashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlashError::Io(err) => Some(err),
            FlashError::FirmwareRead { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for FlashError {
    fn from(err: io::Error) -> Self {
        FlashError::Io(err)
    }
}

/// Errors produced while decoding OTA protocol frames.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameError {
    /// Not enough bytes for a complete frame.
    Truncated { expected: usize, actual: usize },
    /// The frame does not start with the `"OTA\n"` magic.
    BadMagic,
    /// The response code byte is not one the protocol defines.
    UnknownCode(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated { expected, actual } => {
                write!(f, "truncated frame: expected {} bytes, got {}", expected, actual)
            }
            FrameError::BadMagic => write!(f, "frame does not start with the OTA magic"),
            FrameError::UnknownCode(code) => write!(f, "unknown response code {}", code),
        }
    }
}

impl std::error::Error for FrameError {}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn io_errors_convert() {
    let err: FlashError = io::Error::new(io::ErrorKind::Other, "boom").into();
    assert!(matches!(err, FlashError::Io(_)));
    assert_eq!(err.to_string(), "I/O error: boom");
}

#[test]
fn stalled_message_names_pending_count() {
    let err = FlashError::Stalled {
        pending: 3,
        timeout: Duration::from_secs(20),
    };
    assert_eq!(
        err.to_string(),
        "no activity for 20s with 3 connection(s) still pending"
    );
}
