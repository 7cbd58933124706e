//! Programming session
//!
//! A [`ProgrammingSession`] is one connect, program, verify, disconnect
//! cycle. It owns the claimed ICSP lines for its whole lifetime and gives
//! them back on [`ProgrammingSession::close`] or when dropped, after
//! leaving programming mode and driving the outputs to their idle levels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::DeviceProfile;
use crate::error::{Error, Result};
use crate::gpio::{Clock, Direction, GpioBackend, GpioLine, LineDriver, LineRegistry, Offset};
use crate::protocol::ProtocolState;

/// ICSP role to GPIO line offset mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinMap {
    /// MCLR (or VPP switch on high-voltage setups)
    pub mclr: Offset,
    /// Programming clock
    pub pgc: Offset,
    /// Programming data
    pub pgd: Offset,
    /// Target power switch, if the host controls it
    pub vdd: Option<Offset>,
}

impl PinMap {
    /// Offsets in claim order
    pub fn offsets(&self) -> Vec<Offset> {
        let mut offsets = vec![self.mclr, self.pgc, self.pgd];
        offsets.extend(self.vdd);
        offsets
    }
}

impl core::fmt::Display for PinMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "mclr={}, pgc={}, pgd={}", self.mclr, self.pgc, self.pgd)?;
        if let Some(vdd) = self.vdd {
            write!(f, ", vdd={}", vdd)?;
        }
        Ok(())
    }
}

/// Session line indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Mclr = 0,
    Pgc = 1,
    Pgd = 2,
    Vdd = 3, // Only when the host switches target power
}

/// One programming cycle against one target
pub struct ProgrammingSession<B: GpioBackend, C: Clock> {
    pub(crate) driver: LineDriver<B, C>,
    /// Claimed lines indexed by [`Role`]; empty once released
    pub(crate) lines: Vec<GpioLine>,
    pub(crate) profile: Arc<DeviceProfile>,
    pub(crate) state: ProtocolState,
    /// Tracked address counter of the target, `None` when unknown
    pub(crate) pc: Option<u32>,
    /// Set from outside to stop flash operations at the next step
    cancel: Option<Arc<AtomicBool>>,
}

impl<B: GpioBackend, C: Clock> ProgrammingSession<B, C> {
    /// Claim the ICSP lines and leave the target running
    ///
    /// Fails with `ResourceBusy` or `DeviceUnavailable` if any line cannot
    /// be claimed; lines claimed before the failure are given back.
    pub fn open(
        backend: B,
        clock: C,
        registry: LineRegistry,
        pins: &PinMap,
        profile: Arc<DeviceProfile>,
    ) -> Result<Self> {
        let mut driver = LineDriver::new(backend, clock, registry);
        driver.set_read_deadline_us(profile.timing.read_timeout);

        let mut lines = Vec::with_capacity(4);
        for offset in pins.offsets() {
            match driver.claim(offset, Direction::Output) {
                Ok(line) => lines.push(line),
                Err(e) => {
                    for line in lines.into_iter().rev() {
                        if let Err(re) = driver.release(line) {
                            log::warn!("failed to release line after claim error: {}", re);
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut session = Self {
            driver,
            lines,
            profile,
            state: ProtocolState::Disconnected,
            pc: None,
            cancel: None,
        };
        session.drive_idle()?;
        log::debug!(
            "session opened on {} ({}) for {}",
            session.driver.backend().chip(),
            pins,
            session.profile.name
        );
        Ok(session)
    }

    /// Current protocol state
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Device profile the session drives
    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }

    /// Tracked target address counter
    pub fn address(&self) -> Option<u32> {
        self.pc
    }

    /// Stop flash operations once `flag` becomes true
    ///
    /// Operations check the flag between words and fail with
    /// `Interrupted`, leaving programming mode on the way out.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }

    /// Leave programming mode if needed and give the lines back
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.lines.is_empty() {
            return Ok(());
        }

        let mut result = Ok(());
        if self.state.is_connected() {
            result = self.exit_programming_mode();
        }
        if let Err(e) = self.drive_idle() {
            log::warn!("failed to idle ICSP lines: {}", e);
            result = result.and(Err(e));
        }

        let lines = std::mem::take(&mut self.lines);
        for line in lines.into_iter().rev() {
            if let Err(e) = self.driver.release(line) {
                log::warn!("failed to release line: {}", e);
                result = result.and(Err(e));
            }
        }
        log::debug!("session closed");
        result
    }

    pub(crate) fn set_pin(&mut self, role: Role, high: bool) -> Result<()> {
        match self.lines.get(role as usize) {
            Some(line) => self.driver.write(line, high),
            None => Ok(()),
        }
    }

    pub(crate) fn set_pgd_direction(&mut self, direction: Direction) -> Result<()> {
        match self.lines.get_mut(Role::Pgd as usize) {
            Some(line) => self.driver.set_direction(line, direction),
            None => Ok(()),
        }
    }

    /// MCLR level that lets the target run
    ///
    /// On high-voltage setups MCLR switches VPP, so "off" is low.
    pub(crate) fn mclr_run_level(&self) -> bool {
        self.profile.is_low_voltage()
    }

    /// Clock, data and power low, MCLR at run level
    fn drive_idle(&mut self) -> Result<()> {
        self.set_pgd_direction(Direction::Output)?;
        self.set_pin(Role::Pgc, false)?;
        self.set_pin(Role::Pgd, false)?;
        let run = self.mclr_run_level();
        self.set_pin(Role::Mclr, run)?;
        self.set_pin(Role::Vdd, false)
    }
}

impl<B: GpioBackend, C: Clock> Drop for ProgrammingSession<B, C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("session cleanup failed: {}", e);
        }
    }
}
