//! Device profiles and the device database

mod database;
mod profile;
mod quirks;

pub use database::{DeviceDatabase, DeviceDbError};
pub use profile::{
    BitOrder, Commands, ConfigSpace, DeviceId, DeviceProfile, Encoding, EntryMode, EntrySequence,
    MemoryRegion, Timing,
};
pub use quirks::Quirks;

pub(crate) use profile::mask;

#[cfg(test)]
pub(crate) use profile::tests::lvp_profile;
