//! picgp-dummy - Simulated PIC target for testing
//!
//! This crate provides a [`GpioBackend`] that has a PIC wired to it instead
//! of real GPIO lines. The simulated part follows its device profile bit by
//! bit: it only enters programming mode on a correct entry sequence, decodes
//! the commands clocked into it, drives read data back onto PGD and only
//! commits writes and erases when the host waits long enough.
//!
//! Faults (flipped reads, dropped writes, stalled lines, refused requests)
//! can be injected through a [`SimHandle`] to exercise the host's retry and
//! abort paths.

mod target;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use picgp_core::device::DeviceProfile;
use picgp_core::error::{Error, Result};
use picgp_core::gpio::{Direction, GpioBackend, Offset, SimClock};
use picgp_core::image::MemoryImage;
use picgp_core::session::PinMap;

use target::Target;

/// Default GPIO chip name of the simulator
pub const DEFAULT_CHIP: &str = "picgp-sim";

/// Configuration for the simulated target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// GPIO chip name reported to the line registry
    pub chip: String,
    /// Lines the target is wired to
    pub pins: PinMap,
    /// Device ID word, overriding the profile's value
    pub device_id: Option<u32>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            chip: DEFAULT_CHIP.to_string(),
            pins: PinMap {
                mclr: 0,
                pgc: 1,
                pgd: 2,
                vdd: Some(3),
            },
            device_id: None,
        }
    }
}

struct Shared {
    target: Target,
    /// Requested lines and their host-side direction
    lines: BTreeMap<Offset, Direction>,
    denied: BTreeSet<Offset>,
    stall_us: u64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// GPIO backend with a simulated PIC attached
pub struct SimulatedPic {
    chip: String,
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedPic {
    /// Create a simulated target
    ///
    /// Memory starts erased, apart from the device ID word. `clock` should
    /// be the same clock the session uses, so the target sees the host's
    /// delays.
    pub fn new(profile: Arc<DeviceProfile>, config: DummyConfig, clock: SimClock) -> Self {
        let mut target = Target::new(profile, config.pins, clock);
        if let (Some(value), Some(id)) = (config.device_id, target.profile.device_id) {
            target.set_word(id.address, value);
        }
        Self {
            chip: config.chip,
            shared: Arc::new(Mutex::new(Shared {
                target,
                lines: BTreeMap::new(),
                denied: BTreeSet::new(),
                stall_us: 0,
            })),
        }
    }

    /// Create a simulated target with the default wiring and its own clock
    pub fn new_default(profile: Arc<DeviceProfile>) -> Self {
        Self::new(profile, DummyConfig::default(), SimClock::new())
    }

    /// Clock the target runs on
    pub fn clock(&self) -> SimClock {
        lock(&self.shared).target.clock.clone()
    }

    /// Handle for inspecting the target and injecting faults
    ///
    /// Handles stay valid after the backend has been moved into a session.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl GpioBackend for SimulatedPic {
    fn chip(&self) -> &str {
        &self.chip
    }

    fn request(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.denied.contains(&offset) {
            return Err(Error::DeviceUnavailable {
                chip: self.chip.clone(),
                offset,
                reason: "request refused".to_string(),
            });
        }
        shared.lines.insert(offset, direction);
        if offset == shared.target.pins.pgd {
            shared.target.set_pgd_direction(direction == Direction::Output);
        }
        if direction == Direction::Output {
            shared.target.drive(offset, false);
        }
        log::trace!("sim: line {} requested as {}", offset, direction);
        Ok(())
    }

    fn set_direction(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        let mut shared = lock(&self.shared);
        let Some(current) = shared.lines.get_mut(&offset) else {
            return Err(not_requested(&self.chip, offset));
        };
        *current = direction;
        if offset == shared.target.pins.pgd {
            shared.target.set_pgd_direction(direction == Direction::Output);
        }
        Ok(())
    }

    fn write(&mut self, offset: Offset, high: bool) -> Result<()> {
        let mut shared = lock(&self.shared);
        match shared.lines.get(&offset) {
            Some(Direction::Output) => {
                shared.target.drive(offset, high);
                Ok(())
            }
            Some(Direction::Input) => Err(Error::DeviceUnavailable {
                chip: self.chip.clone(),
                offset,
                reason: "line is an input".to_string(),
            }),
            None => Err(not_requested(&self.chip, offset)),
        }
    }

    fn read(&mut self, offset: Offset) -> Result<bool> {
        let shared = lock(&self.shared);
        if !shared.lines.contains_key(&offset) {
            return Err(not_requested(&self.chip, offset));
        }
        if shared.stall_us > 0 {
            shared.target.clock.advance(shared.stall_us);
        }
        if offset == shared.target.pins.pgd {
            Ok(shared.target.pgd_level())
        } else {
            Ok(false)
        }
    }

    fn release(&mut self, offset: Offset) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.lines.remove(&offset).is_none() {
            return Err(not_requested(&self.chip, offset));
        }
        log::trace!("sim: line {} released", offset);
        Ok(())
    }
}

fn not_requested(chip: &str, offset: Offset) -> Error {
    Error::DeviceUnavailable {
        chip: chip.to_string(),
        offset,
        reason: "line not requested".to_string(),
    }
}

/// Shared view of a [`SimulatedPic`]
#[derive(Clone)]
pub struct SimHandle {
    shared: Arc<Mutex<Shared>>,
}

impl SimHandle {
    fn with<T>(&self, f: impl FnOnce(&mut Shared) -> T) -> T {
        let mut shared = lock(&self.shared);
        shared.target.settle_if_elapsed();
        f(&mut *shared)
    }

    /// Word at a device address, `None` outside the memory map
    pub fn word(&self, address: u32) -> Option<u32> {
        self.with(|s| s.target.word(address))
    }

    /// Program memory contents
    pub fn program_memory(&self) -> Vec<u32> {
        self.with(|s| s.target.program.clone())
    }

    /// Configuration space contents
    pub fn config_memory(&self) -> Vec<u32> {
        self.with(|s| s.target.config.clone())
    }

    /// Store words starting at `address`, bypassing the protocol
    pub fn load(&self, address: u32, words: &[u32]) {
        self.with(|s| {
            for (i, word) in words.iter().enumerate() {
                s.target.set_word(address + i as u32, *word);
            }
        })
    }

    /// Whole memory map as a byte image, in the layout `read_memory` produces
    pub fn to_image(&self) -> MemoryImage {
        self.with(|s| {
            let profile = Arc::clone(&s.target.profile);
            let bytes_per_word = profile.bytes_per_word as u32;
            let mut image = MemoryImage::new();
            for (_, range) in profile.regions() {
                for address in range {
                    let word = s.target.word(address).unwrap_or(0);
                    for lane in 0..bytes_per_word {
                        image.set(address * bytes_per_word + lane, (word >> (8 * lane)) as u8);
                    }
                }
            }
            image
        })
    }

    /// Whether the target is in programming mode
    pub fn in_programming_mode(&self) -> bool {
        self.with(|s| s.target.in_programming_mode())
    }

    /// Writes and erases cut short by the host
    pub fn timing_violations(&self) -> usize {
        self.with(|s| s.target.timing_violations)
    }

    /// Clock edges where host and target drove PGD at the same time
    pub fn contentions(&self) -> usize {
        self.with(|s| s.target.contentions)
    }

    /// Successful programming mode entries
    pub fn entries(&self) -> usize {
        self.with(|s| s.target.entries)
    }

    /// Commands decoded
    pub fn commands(&self) -> usize {
        self.with(|s| s.target.commands)
    }

    /// Lines currently requested by the host
    pub fn requested_lines(&self) -> Vec<Offset> {
        self.with(|s| s.lines.keys().copied().collect())
    }

    /// Flip bit 0 of the next `count` reads of `address`
    pub fn flip_reads(&self, address: u32, count: u32) {
        self.with(|s| {
            s.target.read_flips.insert(address, count);
        })
    }

    /// Silently drop the next `count` writes to `address`
    pub fn fail_writes(&self, address: u32, count: u32) {
        self.with(|s| {
            s.target.write_failures.insert(address, count);
        })
    }

    /// Make every line read take `us` microseconds (0 to disable)
    pub fn stall_reads(&self, us: u64) {
        self.with(|s| s.stall_us = us)
    }

    /// Refuse host requests for a line
    pub fn deny_line(&self, offset: Offset) {
        self.with(|s| {
            s.denied.insert(offset);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picgp_core::device::DeviceDatabase;
    use picgp_core::gpio::{Clock, LineRegistry};
    use picgp_core::protocol::ProtocolState;
    use picgp_core::session::ProgrammingSession;
    use picgp_core::ErrorKind;

    fn profile(name: &str) -> Arc<DeviceProfile> {
        DeviceDatabase::builtin().unwrap().resolve(name).unwrap()
    }

    fn open(name: &str) -> (ProgrammingSession<SimulatedPic, SimClock>, SimHandle) {
        let pic = SimulatedPic::new_default(profile(name));
        let handle = pic.handle();
        let clock = pic.clock();
        let pins = DummyConfig::default().pins;
        let session =
            ProgrammingSession::open(pic, clock, LineRegistry::new(), &pins, profile(name)).unwrap();
        (session, handle)
    }

    #[test]
    fn test_memory_starts_erased() {
        let pic = SimulatedPic::new_default(profile("PIC16F1823"));
        let handle = pic.handle();
        assert!(handle.program_memory().iter().all(|w| *w == 0x3FFF));
        assert_eq!(handle.word(0x8006), Some(0x2720));
        assert_eq!(handle.word(0x4000), None);
        assert!(!handle.in_programming_mode());
    }

    #[test]
    fn test_device_id_override() {
        let config = DummyConfig {
            device_id: Some(0x1234),
            ..Default::default()
        };
        let pic = SimulatedPic::new(profile("PIC16F1823"), config, SimClock::new());
        assert_eq!(pic.handle().word(0x8006), Some(0x1234));
    }

    #[test]
    fn test_denied_line() {
        let mut pic = SimulatedPic::new_default(profile("PIC16F1823"));
        pic.handle().deny_line(2);
        let err = pic.request(2, Direction::Output).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
        assert!(pic.request(1, Direction::Output).is_ok());
    }

    #[test]
    fn test_unrequested_line() {
        let mut pic = SimulatedPic::new_default(profile("PIC16F1823"));
        assert!(pic.write(1, true).is_err());
        assert!(pic.read(2).is_err());
        assert!(pic.release(0).is_err());
    }

    #[test]
    fn test_lvp_entry_and_exit() {
        let (mut session, handle) = open("PIC16F1823");
        assert!(!handle.in_programming_mode());
        session.enter_programming_mode().unwrap();
        assert!(handle.in_programming_mode());
        assert_eq!(handle.entries(), 1);
        session.exit_programming_mode().unwrap();
        assert!(!handle.in_programming_mode());
        session.close().unwrap();
        assert!(handle.requested_lines().is_empty());
    }

    #[test]
    fn test_hvp_entry() {
        let (mut session, handle) = open("PIC16F84A");
        session.enter_programming_mode().unwrap();
        assert_eq!(session.state(), ProtocolState::Ready);
        assert!(handle.in_programming_mode());
    }

    #[test]
    fn test_read_device_id() {
        let (mut session, handle) = open("PIC16F1823");
        session.enter_programming_mode().unwrap();
        session.goto(0x8006).unwrap();
        assert_eq!(session.read_data().unwrap(), 0x2720);
        assert_eq!(handle.contentions(), 0);
    }

    #[test]
    fn test_word_write_commits_after_delay() {
        let (mut session, handle) = open("PIC16F1823");
        session.enter_programming_mode().unwrap();
        session.begin_phase(picgp_core::protocol::Phase::Programming).unwrap();
        session.goto(5).unwrap();
        session.load_word(0x0ABC).unwrap();
        session.begin_programming(2500).unwrap();
        session.end_phase().unwrap();
        session.exit_programming_mode().unwrap();
        assert_eq!(handle.word(5), Some(0x0ABC));
        assert_eq!(handle.timing_violations(), 0);
    }

    #[test]
    fn test_interrupted_write_is_dropped() {
        let (mut session, handle) = open("PIC16F1823");
        session.enter_programming_mode().unwrap();
        session.begin_phase(picgp_core::protocol::Phase::Programming).unwrap();
        session.load_word(0x0001).unwrap();
        // Host does not wait for the write to finish
        session.begin_programming(0).unwrap();
        session.increment().unwrap();
        assert_eq!(handle.word(0), Some(0x3FFF));
        assert_eq!(handle.timing_violations(), 1);
    }

    #[test]
    fn test_stalled_read_times_out() {
        let (mut session, handle) = open("PIC16F1823");
        session.enter_programming_mode().unwrap();
        handle.stall_reads(5000);
        let err = session.read_data().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoTimeout);
    }

    #[test]
    fn test_shared_clock() {
        let pic = SimulatedPic::new_default(profile("PIC16F1823"));
        let clock = pic.clock();
        let before = clock.now_us();
        pic.clock().advance(10);
        assert_eq!(clock.now_us(), before + 10);
    }
}
