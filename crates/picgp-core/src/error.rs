//! Error types for picgp-core
//!
//! Every fallible operation in the crate returns [`Error`]. The variants map
//! one-to-one onto the failure kinds a user can see from the command line;
//! [`Error::kind`] and [`Error::address`] give front-ends what they need to
//! report a failure without matching on every variant.

use core::fmt;

use thiserror::Error;

use crate::protocol::ProtocolState;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A GPIO line is already claimed by an active session
    ResourceBusy,
    /// The GPIO backend refused to hand out a line
    DeviceUnavailable,
    /// The target did not answer the programming mode entry as expected
    HandshakeFailed,
    /// A line read exceeded its deadline
    IoTimeout,
    /// Operation not allowed in the current protocol state
    InvalidState,
    /// Malformed Intel HEX input
    CorruptImage,
    /// Intel HEX record type we cannot handle
    UnsupportedFormat,
    /// Read-back did not match after all write attempts
    VerifyFailed,
    /// Programming cycle aborted
    FlashAbort,
    /// Image data outside the device memory map
    AddressOutOfBounds,
    /// Device name not present in the database
    UnknownDevice,
    /// Host I/O error (files, streams)
    Io,
    /// Operation cancelled by the user
    Interrupted,
}

impl ErrorKind {
    /// Short identifier used in user-facing reports
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ResourceBusy => "ResourceBusy",
            Self::DeviceUnavailable => "DeviceUnavailable",
            Self::HandshakeFailed => "HandshakeFailed",
            Self::IoTimeout => "IOTimeout",
            Self::InvalidState => "InvalidState",
            Self::CorruptImage => "CorruptImage",
            Self::UnsupportedFormat => "UnsupportedFormat",
            Self::VerifyFailed => "VerifyFailed",
            Self::FlashAbort => "FlashAbort",
            Self::AddressOutOfBounds => "AddressOutOfBounds",
            Self::UnknownDevice => "UnknownDevice",
            Self::Io => "Io",
            Self::Interrupted => "Interrupted",
        }
    }

    /// Process exit code for this kind of failure (never 0)
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ResourceBusy => 10,
            Self::DeviceUnavailable => 11,
            Self::HandshakeFailed => 12,
            Self::IoTimeout => 13,
            Self::InvalidState => 14,
            Self::CorruptImage => 20,
            Self::UnsupportedFormat => 21,
            Self::AddressOutOfBounds => 22,
            Self::VerifyFailed => 30,
            Self::FlashAbort => 31,
            Self::UnknownDevice => 40,
            Self::Io => 41,
            Self::Interrupted => 130,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Line already claimed in the registry
    #[error("GPIO line {offset} on {chip} is already claimed by an active session")]
    ResourceBusy {
        /// GPIO chip name
        chip: String,
        /// Line offset on the chip
        offset: u32,
    },

    /// Backend could not provide the line
    #[error("GPIO line {offset} on {chip} is unavailable: {reason}")]
    DeviceUnavailable {
        /// GPIO chip name
        chip: String,
        /// Line offset on the chip
        offset: u32,
        /// Backend specific description
        reason: String,
    },

    /// Device ID read during entry did not match the profile
    #[error("programming mode handshake failed: expected device ID 0x{expected:04X}, read 0x{found:04X}")]
    HandshakeFailed {
        /// Expected (masked) device ID
        expected: u32,
        /// Value read from the target (masked)
        found: u32,
    },

    /// A line read took longer than allowed
    #[error("read of GPIO line {offset} exceeded its {deadline_us} us deadline")]
    IoTimeout {
        /// Line offset that was read
        offset: u32,
        /// Deadline that was exceeded
        deadline_us: u32,
    },

    /// Protocol state does not allow the operation
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the session was in
        state: ProtocolState,
    },

    /// Malformed hex input
    #[error("corrupt hex image at line {line}: {reason}")]
    CorruptImage {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Record type outside the supported set
    #[error("unsupported hex record type 0x{record_type:02X} at line {line}")]
    UnsupportedFormat {
        /// 1-based line number
        line: usize,
        /// Record type byte
        record_type: u8,
    },

    /// Read-back mismatch that survived all rewrites
    #[error("verify failed at word 0x{address:04X}: expected 0x{expected:04X}, read 0x{found:04X} ({attempts} write attempts)")]
    VerifyFailed {
        /// Device word address
        address: u32,
        /// Word that should be there
        expected: u32,
        /// Word that was read
        found: u32,
        /// Number of writes issued for this word
        attempts: u32,
    },

    /// The programming cycle was aborted
    #[error("flash aborted ({}): {source}", describe_last(.last_address))]
    FlashAbort {
        /// Last word address that was written and verified, if any
        last_address: Option<u32>,
        /// Underlying failure
        source: Box<Error>,
    },

    /// Address not in the device memory map
    #[error("address 0x{address:08X} is outside device memory")]
    AddressOutOfBounds {
        /// Offending address
        address: u32,
    },

    /// Device lookup failed
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// Host I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Cancellation was requested between two steps
    #[error("interrupted")]
    Interrupted,
}

fn describe_last(last_address: &Option<u32>) -> String {
    match last_address {
        Some(addr) => format!("last good word 0x{:04X}", addr),
        None => "nothing written".to_string(),
    }
}

impl Error {
    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceBusy { .. } => ErrorKind::ResourceBusy,
            Self::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            Self::HandshakeFailed { .. } => ErrorKind::HandshakeFailed,
            Self::IoTimeout { .. } => ErrorKind::IoTimeout,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::CorruptImage { .. } => ErrorKind::CorruptImage,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::VerifyFailed { .. } => ErrorKind::VerifyFailed,
            Self::FlashAbort { .. } => ErrorKind::FlashAbort,
            Self::AddressOutOfBounds { .. } => ErrorKind::AddressOutOfBounds,
            Self::UnknownDevice(_) => ErrorKind::UnknownDevice,
            Self::Io(_) => ErrorKind::Io,
            Self::Interrupted => ErrorKind::Interrupted,
        }
    }

    /// Address relevant to the failure, when there is one
    pub fn address(&self) -> Option<u32> {
        match self {
            Self::VerifyFailed { address, .. } => Some(*address),
            Self::AddressOutOfBounds { address } => Some(*address),
            Self::FlashAbort { last_address, .. } => *last_address,
            _ => None,
        }
    }

    /// Wrap an error as a [`Error::FlashAbort`]
    pub fn abort(last_address: Option<u32>, source: Error) -> Self {
        Self::FlashAbort {
            last_address,
            source: Box::new(source),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reports_last_address() {
        let err = Error::abort(
            Some(0x1F),
            Error::IoTimeout {
                offset: 17,
                deadline_us: 1000,
            },
        );
        assert_eq!(err.kind(), ErrorKind::FlashAbort);
        assert_eq!(err.address(), Some(0x1F));
        let msg = err.to_string();
        assert!(msg.contains("0x001F"), "{}", msg);
        assert!(msg.contains("deadline"), "{}", msg);
    }

    #[test]
    fn test_exit_codes_are_nonzero() {
        let kinds = [
            ErrorKind::ResourceBusy,
            ErrorKind::DeviceUnavailable,
            ErrorKind::HandshakeFailed,
            ErrorKind::IoTimeout,
            ErrorKind::InvalidState,
            ErrorKind::CorruptImage,
            ErrorKind::UnsupportedFormat,
            ErrorKind::VerifyFailed,
            ErrorKind::FlashAbort,
            ErrorKind::AddressOutOfBounds,
            ErrorKind::UnknownDevice,
            ErrorKind::Io,
            ErrorKind::Interrupted,
        ];
        for kind in kinds {
            assert_ne!(kind.exit_code(), 0, "{}", kind);
        }
    }
}
