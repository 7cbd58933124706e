//! ICSP programming protocol
//!
//! The engine itself is implemented on
//! [`ProgrammingSession`](crate::session::ProgrammingSession), which owns the
//! lines it drives. This module holds the state machine types and the frame
//! codec.
//!
//! ```text
//! Disconnected -> Handshaking -> Ready <-> Programming
//!       ^                          |  <-> Verifying
//!       +--------------------------+
//! ```

pub mod codec;
mod engine;

use core::fmt;

/// Protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// Target running, lines idle
    Disconnected,
    /// Entry sequence in progress
    Handshaking,
    /// In programming mode, no phase active
    Ready,
    /// Write phase
    Programming,
    /// Read-back phase
    Verifying,
}

impl ProtocolState {
    /// Whether ICSP commands may be sent
    pub fn accepts_commands(&self) -> bool {
        matches!(self, Self::Ready | Self::Programming | Self::Verifying)
    }

    /// Whether the target is in programming mode
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Handshaking => "Handshaking",
            Self::Ready => "Ready",
            Self::Programming => "Programming",
            Self::Verifying => "Verifying",
        };
        f.write_str(name)
    }
}

/// Phase entered from `Ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Erasing and writing
    Programming,
    /// Reading back
    Verifying,
}

impl From<Phase> for ProtocolState {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Programming => ProtocolState::Programming,
            Phase::Verifying => ProtocolState::Verifying,
        }
    }
}
