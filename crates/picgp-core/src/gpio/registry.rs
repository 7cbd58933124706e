//! Claimed-line bookkeeping

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Direction, Offset};
use crate::error::{Error, Result};

/// Identity of a GPIO line
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineId {
    /// GPIO chip name
    pub chip: String,
    /// Offset on the chip
    pub offset: Offset,
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chip, self.offset)
    }
}

/// Set of lines currently held by active sessions
///
/// The registry is a cheap cloneable handle; every clone sees the same set.
/// Pass the same registry to every driver that must not share lines.
#[derive(Debug, Clone, Default)]
pub struct LineRegistry {
    claimed: Arc<Mutex<BTreeSet<LineId>>>,
}

impl LineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim, handing back the owning [`GpioLine`]
    pub(crate) fn claim(&self, id: LineId, direction: Direction) -> Result<GpioLine> {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.contains(&id) {
            return Err(Error::ResourceBusy {
                chip: id.chip,
                offset: id.offset,
            });
        }
        claimed.insert(id.clone());
        Ok(GpioLine {
            id,
            direction,
            registry: self.clone(),
        })
    }

    /// Whether a line is currently held
    pub fn is_claimed(&self, chip: &str, offset: Offset) -> bool {
        let claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        claimed.iter().any(|id| id.chip == chip && id.offset == offset)
    }

    /// Number of lines currently held
    pub fn claimed_count(&self) -> usize {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn forget(&self, id: &LineId) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// A claimed GPIO line
///
/// Exclusively owned by whoever claimed it. Dropping it removes the registry
/// entry; giving the line back to the host is the driver's job
/// ([`super::LineDriver::release`]).
#[derive(Debug)]
pub struct GpioLine {
    id: LineId,
    direction: Direction,
    registry: LineRegistry,
}

impl GpioLine {
    /// Line identity
    pub fn id(&self) -> &LineId {
        &self.id
    }

    /// Line offset on its chip
    pub fn offset(&self) -> Offset {
        self.id.offset
    }

    /// Current direction
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }
}

impl Drop for GpioLine {
    fn drop(&mut self) {
        self.registry.forget(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(offset: Offset) -> LineId {
        LineId {
            chip: "gpiochip0".into(),
            offset,
        }
    }

    #[test]
    fn test_double_claim_is_busy() {
        let registry = LineRegistry::new();
        let _line = registry.claim(id(4), Direction::Output).unwrap();
        let err = registry.claim(id(4), Direction::Output).unwrap_err();
        assert_eq!(
            err,
            Error::ResourceBusy {
                chip: "gpiochip0".into(),
                offset: 4
            }
        );
    }

    #[test]
    fn test_drop_releases_claim() {
        let registry = LineRegistry::new();
        let line = registry.claim(id(4), Direction::Output).unwrap();
        assert!(registry.is_claimed("gpiochip0", 4));
        drop(line);
        assert!(!registry.is_claimed("gpiochip0", 4));
        assert!(registry.claim(id(4), Direction::Input).is_ok());
    }

    #[test]
    fn test_clones_share_claims() {
        let a = LineRegistry::new();
        let b = a.clone();
        let _line = a.claim(id(1), Direction::Output).unwrap();
        assert!(b.claim(id(1), Direction::Output).is_err());
        assert!(b.claim(id(2), Direction::Output).is_ok());
        // The line from `b` was dropped immediately
        assert_eq!(a.claimed_count(), 1);
    }

    #[test]
    fn test_same_offset_other_chip() {
        let registry = LineRegistry::new();
        let _a = registry.claim(id(3), Direction::Output).unwrap();
        let other = LineId {
            chip: "gpiochip1".into(),
            offset: 3,
        };
        assert!(registry.claim(other, Direction::Output).is_ok());
    }
}
