//! GPIO line driver
//!
//! The host side of the programmer is a handful of GPIO lines. A
//! [`GpioBackend`] knows how to request, drive and sample them on one chip;
//! [`LineDriver`] layers exclusive claiming (through a [`LineRegistry`]) and
//! timing (through a [`Clock`]) on top of it.

mod clock;
mod driver;
#[cfg(test)]
pub(crate) mod mock;
mod registry;

pub use clock::{Clock, SimClock, StdClock};
pub use driver::{LineDriver, DEFAULT_READ_DEADLINE_US};
pub use registry::{GpioLine, LineId, LineRegistry};

use crate::error::Result;

/// Line offset on a GPIO chip
pub type Offset = u32;

/// Line direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Line is sampled by the host
    Input,
    /// Line is driven by the host
    Output,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Host GPIO access
///
/// Implementations map each call onto their hardware (or simulation). Line
/// levels are plain booleans: `true` is electrically high. Output lines are
/// requested driven low.
pub trait GpioBackend {
    /// Name of the GPIO chip the backend talks to (used for claim bookkeeping)
    fn chip(&self) -> &str;

    /// Acquire a line from the host
    ///
    /// Fails with `DeviceUnavailable` if the host refuses (line in use by
    /// another process, insufficient permissions, invalid offset).
    fn request(&mut self, offset: Offset, direction: Direction) -> Result<()>;

    /// Reconfigure a requested line
    fn set_direction(&mut self, offset: Offset, direction: Direction) -> Result<()>;

    /// Drive an output line
    fn write(&mut self, offset: Offset, high: bool) -> Result<()>;

    /// Sample a line
    fn read(&mut self, offset: Offset) -> Result<bool>;

    /// Give a line back to the host
    fn release(&mut self, offset: Offset) -> Result<()>;
}

impl<T: GpioBackend + ?Sized> GpioBackend for Box<T> {
    fn chip(&self) -> &str {
        (**self).chip()
    }

    fn request(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        (**self).request(offset, direction)
    }

    fn set_direction(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        (**self).set_direction(offset, direction)
    }

    fn write(&mut self, offset: Offset, high: bool) -> Result<()> {
        (**self).write(offset, high)
    }

    fn read(&mut self, offset: Offset) -> Result<bool> {
        (**self).read(offset)
    }

    fn release(&mut self, offset: Offset) -> Result<()> {
        (**self).release(offset)
    }
}
