//! Bit-level model of a PIC in programming mode
//!
//! The model watches the levels the host drives on MCLR, VDD, PGC and PGD
//! and reacts the way the device profile says a real part would: entry on
//! MCLR/VPP (and key), commands and payloads sampled on PGC falling edges,
//! read data driven after PGC rising edges, self-timed writes and erases
//! that only complete if the host leaves the bus alone long enough.

use std::collections::BTreeMap;
use std::sync::Arc;

use picgp_core::device::{DeviceProfile, EntryMode, MemoryRegion, Quirks};
use picgp_core::gpio::{Clock, SimClock};
use picgp_core::protocol::codec::{decode_payload, Frame, FrameBuilder};
use picgp_core::session::PinMap;

/// What the device is doing with the serial lines
#[derive(Debug, Clone)]
enum Mode {
    /// Not in programming mode
    Run,
    /// Low-voltage entry: collecting the key
    Key(FrameBuilder),
    /// Key accepted, waiting for the extra clock
    TrailingClock,
    /// Wrong key; everything is ignored until MCLR is released
    Locked,
    /// Collecting a command
    Command(FrameBuilder),
    /// Collecting the payload for a command
    Payload { opcode: u8, frame: FrameBuilder },
    /// Driving a read payload; `index` is the next bit to present
    ReadOut { bits: Vec<bool>, index: usize },
}

/// Self-timed operation in progress
#[derive(Debug, Clone)]
enum Operation {
    Program(Vec<(u32, u32)>),
    RowErase(u32),
    BulkErase { config: bool },
}

#[derive(Debug, Clone)]
struct Pending {
    operation: Operation,
    until: u64,
}

/// Simulated target state
pub(crate) struct Target {
    pub(crate) profile: Arc<DeviceProfile>,
    pub(crate) pins: PinMap,
    pub(crate) clock: SimClock,

    pub(crate) program: Vec<u32>,
    pub(crate) config: Vec<u32>,

    mode: Mode,
    mclr: bool,
    vdd: bool,
    pgc: bool,
    /// Level the host drives on PGD
    pgd_host: bool,
    /// Level the device drives on PGD, when it drives it
    pgd_device: Option<bool>,
    pub(crate) pgd_host_is_output: bool,

    pc: u32,
    latches: BTreeMap<u32, u32>,
    pending: Option<Pending>,

    // Fault injection
    pub(crate) read_flips: BTreeMap<u32, u32>,
    pub(crate) write_failures: BTreeMap<u32, u32>,

    // Statistics
    pub(crate) timing_violations: usize,
    pub(crate) contentions: usize,
    pub(crate) entries: usize,
    pub(crate) commands: usize,
}

impl Target {
    pub(crate) fn new(profile: Arc<DeviceProfile>, pins: PinMap, clock: SimClock) -> Self {
        let erased = profile.erased_word();
        let program = vec![erased; profile.program_words as usize];
        let mut config = vec![erased; profile.config.map_or(0, |c| c.words) as usize];
        if let (Some(id), Some(space)) = (profile.device_id, profile.config) {
            if space.contains(id.address) {
                config[(id.address - space.base) as usize] = id.value & profile.word_mask();
            }
        }
        Self {
            profile,
            pins,
            clock,
            program,
            config,
            mode: Mode::Run,
            mclr: false,
            vdd: false,
            pgc: false,
            pgd_host: false,
            pgd_device: None,
            pgd_host_is_output: true,
            pc: 0,
            latches: BTreeMap::new(),
            pending: None,
            read_flips: BTreeMap::new(),
            write_failures: BTreeMap::new(),
            timing_violations: 0,
            contentions: 0,
            entries: 0,
            commands: 0,
        }
    }

    /// Whether the device is in programming mode
    pub(crate) fn in_programming_mode(&self) -> bool {
        !matches!(self.mode, Mode::Run)
    }

    pub(crate) fn word(&self, address: u32) -> Option<u32> {
        match self.profile.region_of(address)? {
            MemoryRegion::Program => self.program.get(address as usize).copied(),
            MemoryRegion::Config => {
                let base = self.profile.config.map_or(0, |c| c.base);
                self.config.get((address - base) as usize).copied()
            }
        }
    }

    pub(crate) fn set_word(&mut self, address: u32, value: u32) {
        let value = value & self.profile.word_mask();
        match self.profile.region_of(address) {
            Some(MemoryRegion::Program) => {
                if let Some(w) = self.program.get_mut(address as usize) {
                    *w = value;
                }
            }
            Some(MemoryRegion::Config) => {
                let base = self.profile.config.map_or(0, |c| c.base);
                if let Some(w) = self.config.get_mut((address - base) as usize) {
                    *w = value;
                }
            }
            None => {}
        }
    }

    /// Level seen on PGD by the host
    pub(crate) fn pgd_level(&self) -> bool {
        if self.pgd_host_is_output {
            self.pgd_host
        } else {
            self.pgd_device.unwrap_or(false)
        }
    }

    /// Complete a finished operation; does nothing while one is still running
    pub(crate) fn settle_if_elapsed(&mut self) {
        if self
            .pending
            .as_ref()
            .is_some_and(|p| self.clock.now_us() >= p.until)
        {
            self.settle();
        }
    }

    /// The host touched the bus: finish the pending operation, or drop it
    /// if it was interrupted
    fn settle(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let now = self.clock.now_us();
        if now < pending.until {
            self.timing_violations += 1;
            log::warn!(
                "sim: {:?} interrupted {} us early",
                pending.operation,
                pending.until - now
            );
            return;
        }
        self.apply(pending.operation);
    }

    fn apply(&mut self, operation: Operation) {
        let erased = self.profile.erased_word();
        match operation {
            Operation::Program(words) => {
                for (address, value) in words {
                    if !self.profile.is_writable(address) {
                        continue;
                    }
                    if let Some(left) = self.write_failures.get_mut(&address) {
                        if *left > 0 {
                            *left -= 1;
                            log::debug!("sim: dropping write to 0x{:04X}", address);
                            continue;
                        }
                    }
                    // Programming can only clear bits
                    if let Some(current) = self.word(address) {
                        self.set_word(address, current & value);
                    }
                }
            }
            Operation::RowErase(row) => {
                let size = self.profile.erase_block_words.unwrap_or(1);
                for address in row..(row + size).min(self.profile.program_words) {
                    self.set_word(address, erased);
                }
            }
            Operation::BulkErase { config } => {
                self.program.iter_mut().for_each(|w| *w = erased);
                if let Some(space) = self.profile.config.filter(|_| config) {
                    for address in space.base..space.end() {
                        if self.profile.is_writable(address) {
                            self.set_word(address, erased);
                        }
                    }
                }
            }
        }
    }

    /// React to a level change on one of the target's pins
    pub(crate) fn drive(&mut self, offset: u32, high: bool) {
        if offset == self.pins.pgc {
            if high != self.pgc {
                self.pgc = high;
                if high {
                    self.clock_rising();
                } else {
                    self.clock_falling();
                }
            }
        } else if offset == self.pins.pgd {
            self.pgd_host = high;
        } else if offset == self.pins.mclr {
            self.mclr = high;
            self.update_power_state();
        } else if Some(offset) == self.pins.vdd {
            self.vdd = high;
            self.update_power_state();
        }
    }

    pub(crate) fn set_pgd_direction(&mut self, host_output: bool) {
        self.pgd_host_is_output = host_output;
        if host_output && self.pgd_device.is_some() {
            self.contentions += 1;
        }
    }

    fn powered(&self) -> bool {
        self.pins.vdd.is_none() || self.vdd
    }

    fn update_power_state(&mut self) {
        let wants_programming = self.powered()
            && match self.profile.entry.mode {
                EntryMode::LowVoltage => !self.mclr,
                EntryMode::HighVoltage => self.mclr,
            };

        match (wants_programming, self.in_programming_mode()) {
            (true, false) => {
                self.pc = 0;
                self.latches.clear();
                self.pgd_device = None;
                self.mode = match self.profile.entry.mode {
                    EntryMode::LowVoltage => {
                        Mode::Key(FrameBuilder::new(self.profile.entry.key_bits, self.profile.entry.key_order))
                    }
                    EntryMode::HighVoltage => {
                        self.entries += 1;
                        self.new_command()
                    }
                };
                log::trace!("sim: entry started");
            }
            (false, true) => {
                self.settle();
                self.mode = Mode::Run;
                self.pgd_device = None;
                log::trace!("sim: left programming mode");
            }
            _ => {}
        }
    }

    fn new_command(&self) -> Mode {
        Mode::Command(FrameBuilder::new(
            self.profile.encoding.command_bits,
            self.profile.encoding.bit_order,
        ))
    }

    fn clock_rising(&mut self) {
        if !self.in_programming_mode() {
            return;
        }
        self.settle();
        if let Mode::ReadOut { bits, index } = &self.mode {
            let bit = bits.get(*index).copied().unwrap_or(false);
            self.pgd_device = Some(bit);
            if self.pgd_host_is_output {
                self.contentions += 1;
            }
        }
    }

    fn clock_falling(&mut self) {
        let bit = self.pgd_host;
        let mode = std::mem::replace(&mut self.mode, Mode::Run);
        self.mode = match mode {
            Mode::Run => Mode::Run,
            Mode::Locked => Mode::Locked,
            Mode::Key(mut frame) => {
                if !frame.push(bit) {
                    Mode::Key(frame)
                } else if Some(frame.value()) == self.profile.entry.key {
                    self.entries += 1;
                    if self.profile.quirks.contains(Quirks::KEY_TRAILING_CLOCK) {
                        Mode::TrailingClock
                    } else {
                        self.new_command()
                    }
                } else {
                    log::debug!("sim: wrong entry key 0x{:08X}", frame.value());
                    Mode::Locked
                }
            }
            Mode::TrailingClock => self.new_command(),
            Mode::Command(mut frame) => {
                if frame.push(bit) {
                    self.execute(frame.value() as u8)
                } else {
                    Mode::Command(frame)
                }
            }
            Mode::Payload { opcode, mut frame } => {
                if frame.push(bit) {
                    self.load(opcode, frame.value());
                    self.new_command()
                } else {
                    Mode::Payload { opcode, frame }
                }
            }
            Mode::ReadOut { bits, index } => {
                let index = index + 1;
                if index >= bits.len() {
                    self.pgd_device = None;
                    self.new_command()
                } else {
                    Mode::ReadOut { bits, index }
                }
            }
        };
    }

    fn execute(&mut self, opcode: u8) -> Mode {
        self.commands += 1;
        let commands = self.profile.commands;
        let timing = self.profile.timing;
        let now = self.clock.now_us();

        if commands.takes_payload(opcode) {
            return Mode::Payload {
                opcode,
                frame: FrameBuilder::new(self.profile.encoding.payload_bits, self.profile.encoding.bit_order),
            };
        }

        if opcode == commands.read_data {
            let mut value = self.word(self.pc).unwrap_or(0);
            if let Some(left) = self.read_flips.get_mut(&self.pc) {
                if *left > 0 {
                    *left -= 1;
                    value ^= 1;
                }
            }
            let bits = Frame::payload(&self.profile.encoding, value).iter().collect();
            return Mode::ReadOut { bits, index: 0 };
        }

        if opcode == commands.increment_address {
            self.pc = self.pc.wrapping_add(1);
        } else if commands.reset_address == Some(opcode) {
            self.pc = 0;
        } else if opcode == commands.begin_programming {
            let words: Vec<(u32, u32)> = std::mem::take(&mut self.latches).into_iter().collect();
            let in_config = self.profile.region_of(self.pc) == Some(MemoryRegion::Config);
            let duration = if in_config {
                timing.program_config
            } else {
                timing.program
            };
            self.pending = Some(Pending {
                operation: Operation::Program(words),
                until: now + duration as u64,
            });
        } else if opcode == commands.bulk_erase {
            let config = self.profile.region_of(self.pc) == Some(MemoryRegion::Config);
            self.pending = Some(Pending {
                operation: Operation::BulkErase { config },
                until: now + timing.bulk_erase as u64,
            });
        } else if commands.row_erase == Some(opcode) {
            if let Some(size) = self.profile.erase_block_words {
                if self.pc < self.profile.program_words {
                    self.pending = Some(Pending {
                        operation: Operation::RowErase(self.pc / size * size),
                        until: now + timing.row_erase as u64,
                    });
                }
            }
        } else {
            log::debug!("sim: ignoring unknown command 0x{:02X}", opcode);
        }
        self.new_command()
    }

    fn load(&mut self, opcode: u8, frame: u32) {
        let commands = self.profile.commands;
        let value = decode_payload(&self.profile.encoding, frame);
        if opcode == commands.load_data {
            self.latches.insert(self.pc, value & self.profile.word_mask());
        } else if commands.load_configuration == Some(opcode) {
            if let Some(space) = self.profile.config {
                self.pc = space.base;
            }
        } else if commands.load_address == Some(opcode) {
            self.pc = value;
        }
    }
}
