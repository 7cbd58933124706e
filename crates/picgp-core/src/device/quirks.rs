//! Device quirk flags

use bitflags::bitflags;

bitflags! {
    /// Behaviours that differ between otherwise similar devices
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Quirks: u32 {
        /// One extra PGC pulse is needed after the entry key
        const KEY_TRAILING_CLOCK = 1 << 0;
        /// VPP must be applied before VDD on high-voltage entry
        const VPP_BEFORE_VDD     = 1 << 1;
    }
}

impl Default for Quirks {
    fn default() -> Self {
        Self::empty()
    }
}
