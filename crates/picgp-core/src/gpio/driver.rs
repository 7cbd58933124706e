//! Line driver: claiming, driving and sampling lines

use super::registry::{GpioLine, LineId, LineRegistry};
use super::{Clock, Direction, GpioBackend};
use crate::error::{Error, Result};

/// Default per-read deadline in microseconds
pub const DEFAULT_READ_DEADLINE_US: u32 = 1000;

/// GPIO line driver
///
/// Wraps a [`GpioBackend`] with exclusive line claims and a [`Clock`] used
/// for delays and read deadlines.
pub struct LineDriver<B, C> {
    backend: B,
    clock: C,
    registry: LineRegistry,
    read_deadline_us: u32,
}

impl<B: GpioBackend, C: Clock> LineDriver<B, C> {
    /// Create a driver recording its claims in `registry`
    pub fn new(backend: B, clock: C, registry: LineRegistry) -> Self {
        Self {
            backend,
            clock,
            registry,
            read_deadline_us: DEFAULT_READ_DEADLINE_US,
        }
    }

    /// Change the per-read deadline
    pub fn set_read_deadline_us(&mut self, us: u32) {
        self.read_deadline_us = us;
    }

    /// Per-read deadline
    pub fn read_deadline_us(&self) -> u32 {
        self.read_deadline_us
    }

    /// Claim a line for exclusive use
    ///
    /// Fails with `ResourceBusy` if an active session already holds it, or
    /// `DeviceUnavailable` if the backend refuses. The registry is left
    /// unchanged on failure.
    pub fn claim(&mut self, offset: u32, direction: Direction) -> Result<GpioLine> {
        let id = LineId {
            chip: self.backend.chip().to_string(),
            offset,
        };
        let line = self.registry.claim(id, direction)?;
        // On failure `line` drops here and takes its registry entry with it
        self.backend.request(offset, direction)?;
        log::trace!("claimed line {} as {}", line.id(), direction);
        Ok(line)
    }

    /// Change the direction of a claimed line
    pub fn set_direction(&mut self, line: &mut GpioLine, direction: Direction) -> Result<()> {
        if line.direction() == direction {
            return Ok(());
        }
        self.backend.set_direction(line.offset(), direction)?;
        line.set_direction(direction);
        Ok(())
    }

    /// Drive a line
    pub fn write(&mut self, line: &GpioLine, high: bool) -> Result<()> {
        self.backend.write(line.offset(), high)
    }

    /// Sample a line, failing with `IOTimeout` if the read overran its deadline
    pub fn read(&mut self, line: &GpioLine) -> Result<bool> {
        let start = self.clock.now_us();
        let value = self.backend.read(line.offset())?;
        let elapsed = self.clock.now_us().saturating_sub(start);
        if elapsed > self.read_deadline_us as u64 {
            return Err(Error::IoTimeout {
                offset: line.offset(),
                deadline_us: self.read_deadline_us,
            });
        }
        Ok(value)
    }

    /// Wait on the driver's clock
    pub fn sleep_us(&self, us: u32) {
        self.clock.sleep_us(us);
    }

    /// Give a line back to the host and drop its claim
    ///
    /// The claim is dropped even when the backend release fails.
    pub fn release(&mut self, line: GpioLine) -> Result<()> {
        let result = self.backend.release(line.offset());
        log::trace!("released line {}", line.id());
        drop(line);
        result
    }

    /// Registry this driver records claims in
    pub fn registry(&self) -> &LineRegistry {
        &self.registry
    }

    /// Clock used for delays
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Underlying backend, mutably
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
