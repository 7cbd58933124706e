//! CLI command implementations
//!
//! Hardware commands open a [`Session`] on the selected programmer and hand
//! it to the flash orchestrator; `info` and the list commands never touch
//! hardware.

mod erase;
mod info;
mod list;
mod program;
mod progress;
mod read;
mod verify;

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use picgp_core::device::DeviceProfile;
use picgp_core::gpio::{Clock, GpioBackend, LineRegistry};
use picgp_core::image::{self, MemoryImage};
use picgp_core::session::ProgrammingSession;

use crate::programmers::Programmer;

pub use erase::run_erase;
pub use info::run_info;
pub use list::{list_devices, list_programmers};
pub use program::run_program;
pub use progress::IndicatifProgress;
pub use read::run_read;
pub use verify::run_verify;

/// Session on whatever programmer was selected
pub type Session = ProgrammingSession<Box<dyn GpioBackend>, Box<dyn Clock>>;

/// Claim the programmer's lines for `profile`
///
/// Setting `cancel` stops the flash operation running on the session.
pub fn open_session(
    programmer: Programmer,
    profile: Arc<DeviceProfile>,
    cancel: Arc<AtomicBool>,
) -> Result<Session, Box<dyn std::error::Error>> {
    let mut session = ProgrammingSession::open(
        programmer.backend,
        programmer.clock,
        LineRegistry::new(),
        &programmer.pins,
        profile,
    )?;
    session.set_cancel_flag(cancel);
    Ok(session)
}

/// Parse an Intel HEX file
fn load_image(path: &Path) -> Result<MemoryImage, Box<dyn std::error::Error>> {
    let image = image::parse_file(path)?;
    println!("Read {} bytes from {:?}", image.len(), path);
    Ok(image)
}

/// Print the device being worked on
fn print_device(profile: &DeviceProfile) {
    println!(
        "Device: {} {} ({} words program memory)",
        profile.vendor, profile.name, profile.program_words
    );
}
