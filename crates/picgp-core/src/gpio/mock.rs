//! Recording backend for unit tests

use std::collections::BTreeMap;

use super::{Direction, GpioBackend, Offset, SimClock};
use crate::error::{Error, Result};

/// Backend that records line levels and can be told to refuse or stall
#[derive(Debug, Default)]
pub(crate) struct MockBackend {
    pub(crate) lines: BTreeMap<Offset, (Direction, bool)>,
    pub(crate) refuse: Vec<Offset>,
    pub(crate) stall_us: u64,
    pub(crate) clock: SimClock,
    pub(crate) writes: usize,
}

impl GpioBackend for MockBackend {
    fn chip(&self) -> &str {
        "mock"
    }

    fn request(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        if self.refuse.contains(&offset) {
            return Err(Error::DeviceUnavailable {
                chip: "mock".into(),
                offset,
                reason: "busy".into(),
            });
        }
        self.lines.insert(offset, (direction, false));
        Ok(())
    }

    fn set_direction(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        if let Some(line) = self.lines.get_mut(&offset) {
            line.0 = direction;
        }
        Ok(())
    }

    fn write(&mut self, offset: Offset, high: bool) -> Result<()> {
        self.writes += 1;
        if let Some(line) = self.lines.get_mut(&offset) {
            line.1 = high;
        }
        Ok(())
    }

    fn read(&mut self, offset: Offset) -> Result<bool> {
        self.clock.advance(self.stall_us);
        Ok(self.lines.get(&offset).map(|l| l.1).unwrap_or(false))
    }

    fn release(&mut self, offset: Offset) -> Result<()> {
        self.lines.remove(&offset);
        Ok(())
    }
}
