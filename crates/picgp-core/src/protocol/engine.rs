//! ICSP protocol engine
//!
//! Bit-level signalling: the host sets PGD, raises PGC, waits half a
//! period, drops PGC (the target latches on the falling edge) and waits
//! again. When reading, the target drives PGD after the rising edge and the
//! host samples it before the falling edge.

use super::codec::{decode_payload, Frame, FrameBuilder};
use super::{Phase, ProtocolState};
use crate::device::{EntryMode, MemoryRegion, Quirks};
use crate::error::{Error, Result};
use crate::gpio::{Clock, Direction, GpioBackend};
use crate::session::{ProgrammingSession, Role};

impl<B: GpioBackend, C: Clock> ProgrammingSession<B, C> {
    /// Put the target into programming mode
    ///
    /// Asserts the profile's entry sequence and, when the profile has one,
    /// checks the device ID. On any failure the lines are driven back to
    /// their run levels and the session returns to `Disconnected`.
    pub fn enter_programming_mode(&mut self) -> Result<()> {
        if self.state != ProtocolState::Disconnected {
            return Err(self.invalid("enter programming mode"));
        }
        self.state = ProtocolState::Handshaking;

        match self.handshake() {
            Ok(()) => {
                self.state = ProtocolState::Ready;
                log::info!("{} in programming mode", self.profile.name);
                Ok(())
            }
            Err(e) => {
                log::debug!("programming mode entry failed: {}", e);
                if let Err(re) = self.drive_run() {
                    log::warn!("failed to release target after entry failure: {}", re);
                }
                self.state = ProtocolState::Disconnected;
                self.pc = None;
                Err(e)
            }
        }
    }

    /// Leave programming mode and let the target run
    pub fn exit_programming_mode(&mut self) -> Result<()> {
        if !self.state.is_connected() {
            return Err(self.invalid("exit programming mode"));
        }
        let result = self.drive_run();
        self.driver.sleep_us(self.profile.timing.exit);
        self.state = ProtocolState::Disconnected;
        self.pc = None;
        log::debug!("left programming mode");
        result
    }

    /// Send one command, with an optional host payload
    ///
    /// Fails with `InvalidState` before touching any line when the session
    /// is not in programming mode.
    pub fn send_command(&mut self, opcode: u8, payload: Option<u32>) -> Result<()> {
        self.require_commands("send command")?;
        self.raw_command(opcode, payload)
    }

    /// Clock in one payload frame from the target
    pub fn read_word(&mut self) -> Result<u32> {
        self.require_commands("read word")?;
        self.raw_read_word()
    }

    /// Enter a phase from `Ready`
    pub fn begin_phase(&mut self, phase: Phase) -> Result<()> {
        if self.state != ProtocolState::Ready {
            return Err(self.invalid("begin phase"));
        }
        self.state = phase.into();
        log::trace!("entered {} phase", self.state);
        Ok(())
    }

    /// Return to `Ready` from a phase
    pub fn end_phase(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            ProtocolState::Programming | ProtocolState::Verifying
        ) {
            return Err(self.invalid("end phase"));
        }
        self.state = ProtocolState::Ready;
        Ok(())
    }

    /// Move the target address counter to `address`
    pub fn goto(&mut self, address: u32) -> Result<()> {
        self.require_commands("goto")?;
        self.seek(address)
    }

    /// Advance the target address counter by one word
    pub fn increment(&mut self) -> Result<()> {
        self.require_commands("increment address")?;
        let op = self.profile.commands.increment_address;
        self.raw_command(op, None)
    }

    /// Read the word at the current address
    pub fn read_data(&mut self) -> Result<u32> {
        self.require_commands("read data")?;
        self.raw_read_data()
    }

    /// Load a word into the write latch at the current address
    pub fn load_word(&mut self, word: u32) -> Result<()> {
        self.require(ProtocolState::Programming, "load word")?;
        let op = self.profile.commands.load_data;
        let word = word & self.profile.word_mask();
        self.raw_command(op, Some(word))
    }

    /// Commit the write latches and wait `wait_us` for the write to finish
    pub fn begin_programming(&mut self, wait_us: u32) -> Result<()> {
        self.require(ProtocolState::Programming, "begin programming")?;
        let op = self.profile.commands.begin_programming;
        self.raw_command(op, None)?;
        self.driver.sleep_us(wait_us);
        Ok(())
    }

    /// Erase the row containing the current address
    pub fn row_erase(&mut self) -> Result<()> {
        self.require(ProtocolState::Programming, "row erase")?;
        let Some(op) = self.profile.commands.row_erase else {
            return Err(self.invalid("row erase"));
        };
        self.raw_command(op, None)?;
        self.driver.sleep_us(self.profile.timing.row_erase);
        Ok(())
    }

    /// Erase program memory, and the configuration words with `include_config`
    pub fn bulk_erase(&mut self, include_config: bool) -> Result<()> {
        self.require(ProtocolState::Programming, "bulk erase")?;
        match self.profile.config {
            Some(config) if include_config => self.seek(config.base)?,
            _ => {
                let in_config = self
                    .pc
                    .is_some_and(|pc| self.profile.region_of(pc) == Some(MemoryRegion::Config));
                if in_config || self.pc.is_none() {
                    self.seek(0)?;
                }
            }
        }
        let op = self.profile.commands.bulk_erase;
        self.raw_command(op, None)?;
        self.driver.sleep_us(self.profile.timing.bulk_erase);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals. These skip the state checks so the handshake can use them.
    // ------------------------------------------------------------------

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn require(&self, state: ProtocolState, operation: &'static str) -> Result<()> {
        if self.state != state {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn require_commands(&self, operation: &'static str) -> Result<()> {
        if !self.state.accepts_commands() {
            return Err(self.invalid(operation));
        }
        Ok(())
    }

    fn handshake(&mut self) -> Result<()> {
        self.assert_entry()?;
        if let Some(id) = self.profile.device_id {
            self.seek(id.address)?;
            let found = self.raw_read_data()?;
            if !id.matches(found) {
                return Err(Error::HandshakeFailed {
                    expected: id.value & id.mask,
                    found: found & id.mask,
                });
            }
            log::debug!("device ID 0x{:04X} (revision bits 0x{:04X})", found & id.mask, found & !id.mask);
        }
        Ok(())
    }

    /// Drive the entry sequence; leaves the address counter at zero
    fn assert_entry(&mut self) -> Result<()> {
        let timing = self.profile.timing;
        let entry = self.profile.entry;
        self.set_pgd_direction(Direction::Output)?;
        self.set_pin(Role::Pgc, false)?;
        self.set_pin(Role::Pgd, false)?;

        match entry.mode {
            EntryMode::LowVoltage => {
                self.set_pin(Role::Mclr, false)?;
                self.set_pin(Role::Vdd, true)?;
                self.driver.sleep_us(timing.entry_hold);
                if let Some(key) = entry.key {
                    self.clock_out(Frame::new(key, entry.key_bits, entry.key_order))?;
                }
                if self.profile.quirks.contains(Quirks::KEY_TRAILING_CLOCK) {
                    self.clock_bit(false)?;
                }
            }
            EntryMode::HighVoltage => {
                if self.profile.quirks.contains(Quirks::VPP_BEFORE_VDD) {
                    self.set_pin(Role::Mclr, true)?;
                    self.set_pin(Role::Vdd, true)?;
                } else {
                    self.set_pin(Role::Vdd, true)?;
                    self.driver.sleep_us(timing.entry_hold);
                    self.set_pin(Role::Mclr, true)?;
                }
            }
        }
        self.driver.sleep_us(timing.entry_hold);
        self.pc = Some(0);
        Ok(())
    }

    /// Leave programming mode without touching the protocol state
    fn drive_run(&mut self) -> Result<()> {
        self.set_pgd_direction(Direction::Output)?;
        self.set_pin(Role::Pgc, false)?;
        self.set_pin(Role::Pgd, false)?;
        let run = self.mclr_run_level();
        self.set_pin(Role::Mclr, run)
    }

    /// Exit and re-enter programming mode to reset the address counter
    fn reenter(&mut self) -> Result<()> {
        log::trace!("re-entering programming mode to reset the address counter");
        self.drive_run()?;
        self.driver.sleep_us(self.profile.timing.exit);
        self.assert_entry()
    }

    fn seek(&mut self, target: u32) -> Result<()> {
        let region = self
            .profile
            .region_of(target)
            .ok_or(Error::AddressOutOfBounds { address: target })?;
        let commands = self.profile.commands;

        if let Some(op) = commands.load_address {
            if self.pc != Some(target) {
                self.raw_command(op, Some(target))?;
            }
            return Ok(());
        }

        let start = match self.pc {
            Some(pc) if pc <= target && self.profile.region_of(pc) == Some(region) => pc,
            _ => match region {
                MemoryRegion::Config => {
                    let op = commands
                        .load_configuration
                        .ok_or(Error::AddressOutOfBounds { address: target })?;
                    self.raw_command(op, Some(0))?;
                    self.pc.unwrap_or(target)
                }
                MemoryRegion::Program => {
                    if let Some(op) = commands.reset_address {
                        self.raw_command(op, None)?;
                    } else {
                        self.reenter()?;
                    }
                    0
                }
            },
        };

        for _ in start..target {
            self.raw_command(commands.increment_address, None)?;
        }
        Ok(())
    }

    fn raw_command(&mut self, opcode: u8, payload: Option<u32>) -> Result<()> {
        let encoding = self.profile.encoding;
        let delay = self.profile.timing.command_delay;
        self.clock_out(Frame::command(&encoding, opcode))?;
        self.driver.sleep_us(delay);
        if let Some(value) = payload {
            self.clock_out(Frame::payload(&encoding, value))?;
            self.driver.sleep_us(delay);
        }
        self.track(opcode, payload);
        Ok(())
    }

    fn raw_read_data(&mut self) -> Result<u32> {
        let op = self.profile.commands.read_data;
        self.raw_command(op, None)?;
        self.raw_read_word()
    }

    fn raw_read_word(&mut self) -> Result<u32> {
        let encoding = self.profile.encoding;
        self.set_pgd_direction(Direction::Input)?;
        let bits = self.clock_in(encoding.payload_bits);
        let restored = self.set_pgd_direction(Direction::Output);
        let bits = bits?;
        restored?;
        self.driver.sleep_us(self.profile.timing.command_delay);
        Ok(decode_payload(&encoding, bits))
    }

    /// Follow the target's address counter through a command
    fn track(&mut self, opcode: u8, payload: Option<u32>) {
        let commands = &self.profile.commands;
        if opcode == commands.increment_address {
            self.pc = self.pc.map(|pc| pc + 1);
        } else if commands.reset_address == Some(opcode) {
            self.pc = Some(0);
        } else if commands.load_configuration == Some(opcode) {
            self.pc = self.profile.config.map(|c| c.base);
        } else if commands.load_address == Some(opcode) {
            self.pc = payload;
        }
    }

    fn clock_out(&mut self, frame: Frame) -> Result<()> {
        for bit in frame.iter() {
            self.clock_bit(bit)?;
        }
        Ok(())
    }

    fn clock_bit(&mut self, bit: bool) -> Result<()> {
        let half = self.profile.timing.clock_half_period;
        self.set_pin(Role::Pgd, bit)?;
        self.set_pin(Role::Pgc, true)?;
        self.driver.sleep_us(half);
        self.set_pin(Role::Pgc, false)?;
        self.driver.sleep_us(half);
        Ok(())
    }

    fn clock_in(&mut self, len: u8) -> Result<u32> {
        let half = self.profile.timing.clock_half_period;
        let mut frame = FrameBuilder::new(len, self.profile.encoding.bit_order);
        for _ in 0..len {
            self.set_pin(Role::Pgc, true)?;
            self.driver.sleep_us(half);
            let bit = match self.lines.get(Role::Pgd as usize) {
                Some(line) => self.driver.read(line)?,
                None => false,
            };
            self.set_pin(Role::Pgc, false)?;
            self.driver.sleep_us(half);
            frame.push(bit);
        }
        Ok(frame.value())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::device::lvp_profile;
    use crate::gpio::mock::MockBackend;
    use crate::gpio::{LineRegistry, SimClock};
    use crate::session::{PinMap, ProgrammingSession};
    use crate::{Error, ErrorKind};

    use super::*;

    fn session() -> ProgrammingSession<MockBackend, SimClock> {
        let mut profile = lvp_profile();
        // The mock target never answers, so skip the ID check
        profile.device_id = None;
        let pins = PinMap {
            mclr: 1,
            pgc: 2,
            pgd: 3,
            vdd: None,
        };
        ProgrammingSession::open(
            MockBackend::default(),
            SimClock::new(),
            LineRegistry::new(),
            &pins,
            Arc::new(profile),
        )
        .unwrap()
    }

    #[test]
    fn test_command_when_disconnected_has_no_side_effect() {
        let mut s = session();
        let writes = s.driver.backend().writes;
        let err = s.send_command(0x06, None).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidState {
                operation: "send command",
                state: ProtocolState::Disconnected
            }
        );
        assert_eq!(s.driver.backend().writes, writes);
        assert_eq!(s.read_word().unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(s.driver.backend().writes, writes);
    }

    #[test]
    fn test_state_transitions() {
        let mut s = session();
        assert!(s.begin_phase(Phase::Programming).is_err());
        s.enter_programming_mode().unwrap();
        assert_eq!(s.state(), ProtocolState::Ready);
        assert_eq!(s.address(), Some(0));
        assert!(s.enter_programming_mode().is_err());

        assert!(s.end_phase().is_err());
        s.begin_phase(Phase::Programming).unwrap();
        assert!(s.begin_phase(Phase::Verifying).is_err());
        s.end_phase().unwrap();
        s.begin_phase(Phase::Verifying).unwrap();
        // Writes are refused outside the programming phase
        assert_eq!(s.load_word(0x3FFF).unwrap_err().kind(), ErrorKind::InvalidState);
        s.end_phase().unwrap();

        s.exit_programming_mode().unwrap();
        assert_eq!(s.state(), ProtocolState::Disconnected);
        assert_eq!(s.address(), None);
        assert!(s.exit_programming_mode().is_err());
    }

    #[test]
    fn test_address_tracking() {
        let mut s = session();
        s.enter_programming_mode().unwrap();
        s.goto(5).unwrap();
        assert_eq!(s.address(), Some(5));
        s.goto(2).unwrap();
        assert_eq!(s.address(), Some(2));
        s.goto(0x8007).unwrap();
        assert_eq!(s.address(), Some(0x8007));
        s.increment().unwrap();
        assert_eq!(s.address(), Some(0x8008));
        let err = s.goto(0x4000).unwrap_err();
        assert_eq!(err, Error::AddressOutOfBounds { address: 0x4000 });
    }

    #[test]
    fn test_entry_leaves_mclr_low() {
        let mut s = session();
        s.enter_programming_mode().unwrap();
        let lines = &s.driver.backend().lines;
        assert!(!lines[&1].1, "MCLR held low in low-voltage programming mode");
        assert!(!lines[&2].1, "PGC idles low");
        s.exit_programming_mode().unwrap();
        assert!(s.driver.backend().lines[&1].1);
    }

    #[test]
    fn test_handshake_mismatch_returns_to_disconnected() {
        // The mock reads back whatever PGD was last driven (low), so the
        // device ID comes back as zero
        let pins = PinMap {
            mclr: 1,
            pgc: 2,
            pgd: 3,
            vdd: None,
        };
        let mut s = ProgrammingSession::open(
            MockBackend::default(),
            SimClock::new(),
            LineRegistry::new(),
            &pins,
            Arc::new(lvp_profile()),
        )
        .unwrap();
        let err = s.enter_programming_mode().unwrap_err();
        assert_eq!(
            err,
            Error::HandshakeFailed {
                expected: 0x2720,
                found: 0
            }
        );
        assert_eq!(s.state(), ProtocolState::Disconnected);
        assert!(s.driver.backend().lines[&1].1, "target released");
    }
}
