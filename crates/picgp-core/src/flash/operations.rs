//! Program, verify, read and erase cycles

use super::plan::{chunks, ErasePlan, WordRun, WritePlan};
use super::progress::FlashProgress;
use crate::device::{DeviceProfile, MemoryRegion};
use crate::error::{Error, Result};
use crate::gpio::{Clock, GpioBackend};
use crate::image::MemoryImage;
use crate::protocol::Phase;
use crate::session::ProgrammingSession;

/// Rewrites allowed per word after a verify mismatch
pub const DEFAULT_RETRIES: u32 = 3;

/// Options for [`program`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Erase before writing
    pub erase: bool,
    /// Read back and compare every written word
    pub verify: bool,
    /// Check the erased words before writing
    pub blank_check: bool,
    /// Rewrites allowed per mismatching word
    pub retries: u32,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            erase: true,
            verify: true,
            blank_check: false,
            retries: DEFAULT_RETRIES,
        }
    }
}

/// Statistics from a flash operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// Words written (rewrites not counted)
    pub words_written: usize,
    /// Words read back and found correct
    pub words_verified: usize,
    /// Rewrites issued after verify mismatches
    pub retries: u32,
    /// Rows erased
    pub rows_erased: usize,
    /// Whether a bulk erase was issued
    pub bulk_erased: bool,
}

/// Program an image into the target
///
/// The image is mapped onto device words before any line is touched, so an
/// image that does not fit fails with `AddressOutOfBounds` without side
/// effects. Entry and erase failures, and I/O failures while writing, are
/// reported as `FlashAbort` carrying the last verified word address. A word
/// that still reads back wrong after `options.retries` rewrites fails with
/// `VerifyFailed`. A cancelled session stops at the next word with
/// `FlashAbort` wrapping `Interrupted`. Programming mode is left on every
/// path.
pub fn program<B, C, P>(
    session: &mut ProgrammingSession<B, C>,
    image: &MemoryImage,
    options: &ProgramOptions,
    progress: &mut P,
) -> Result<FlashReport>
where
    B: GpioBackend,
    C: Clock,
    P: FlashProgress + ?Sized,
{
    let profile = session.profile().clone();
    let plan = WritePlan::from_image(&profile, image)?;
    log::info!(
        "programming {} words into {} ({} runs)",
        plan.word_count(),
        profile.name,
        plan.runs().len()
    );

    session
        .enter_programming_mode()
        .map_err(|e| Error::abort(None, e))?;

    let mut writer = Writer {
        profile: &profile,
        options,
        report: FlashReport::default(),
        last_good: None,
    };
    let result = writer.run(session, &plan, progress);
    let exit = session.exit_programming_mode();

    match (result, exit) {
        (Ok(()), Ok(())) => {
            progress.complete(&writer.report);
            log::info!(
                "programmed {} words, verified {}, {} retries",
                writer.report.words_written,
                writer.report.words_verified,
                writer.report.retries
            );
            Ok(writer.report)
        }
        (Ok(()), Err(e)) => Err(Error::abort(writer.last_good, e)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(exit_err)) => {
            log::warn!("failed to leave programming mode: {}", exit_err);
            Err(e)
        }
    }
}

struct Writer<'a> {
    profile: &'a DeviceProfile,
    options: &'a ProgramOptions,
    report: FlashReport,
    /// Last word written and (when verifying) confirmed
    last_good: Option<u32>,
}

impl Writer<'_> {
    fn run<B, C, P>(
        &mut self,
        session: &mut ProgrammingSession<B, C>,
        plan: &WritePlan,
        progress: &mut P,
    ) -> Result<()>
    where
        B: GpioBackend,
        C: Clock,
        P: FlashProgress + ?Sized,
    {
        session
            .begin_phase(Phase::Programming)
            .map_err(|e| Error::abort(None, e))?;

        if self.options.erase {
            self.erase(session, plan, progress)
                .map_err(|e| Error::abort(None, e))?;
        }
        if self.options.blank_check {
            self.blank_check(session, plan)?;
        }

        progress.writing(plan.word_count());
        let mut written = 0;
        for run in plan.runs() {
            let wait = match run.region {
                MemoryRegion::Program => self.profile.timing.program,
                MemoryRegion::Config => self.profile.timing.program_config,
            };
            for (start, words) in chunks(run, self.profile) {
                session
                    .check_cancelled()
                    .map_err(|e| Error::abort(self.last_good, e))?;
                write_chunk(session, start, words, wait)
                    .map_err(|e| Error::abort(self.last_good, e))?;
                self.report.words_written += words.len();
                if !self.options.verify {
                    self.last_good = Some(start + words.len() as u32 - 1);
                }
                written += words.len();
                progress.write_progress(written);
            }

            if self.options.verify {
                self.verify_run(session, run, wait, progress)?;
            }
        }

        session.end_phase().map_err(|e| Error::abort(self.last_good, e))
    }

    fn erase<B, C, P>(
        &mut self,
        session: &mut ProgrammingSession<B, C>,
        plan: &WritePlan,
        progress: &mut P,
    ) -> Result<()>
    where
        B: GpioBackend,
        C: Clock,
        P: FlashProgress + ?Sized,
    {
        match plan.erase_plan(self.profile) {
            ErasePlan::None => {}
            ErasePlan::Bulk { include_config } => {
                log::debug!("bulk erase (configuration words: {})", include_config);
                progress.erasing(1);
                session.bulk_erase(include_config)?;
                progress.erase_progress(1);
                self.report.bulk_erased = true;
            }
            ErasePlan::Rows(rows) => {
                log::debug!("erasing {} rows", rows.len());
                progress.erasing(rows.len());
                for (i, row) in rows.iter().enumerate() {
                    session.check_cancelled()?;
                    session.goto(*row)?;
                    session.row_erase()?;
                    self.report.rows_erased += 1;
                    progress.erase_progress(i + 1);
                }
            }
        }
        Ok(())
    }

    fn blank_check<B: GpioBackend, C: Clock>(
        &mut self,
        session: &mut ProgrammingSession<B, C>,
        plan: &WritePlan,
    ) -> Result<()> {
        let erased = self.profile.erased_word();
        let mask = self.profile.word_mask();
        let check = |session: &mut ProgrammingSession<B, C>| -> Result<()> {
            session.end_phase()?;
            session.begin_phase(Phase::Verifying)?;
            for run in plan.runs() {
                session.goto(run.start)?;
                for (i, (address, _)) in run.iter().enumerate() {
                    session.check_cancelled()?;
                    if i > 0 {
                        session.increment()?;
                    }
                    let found = session.read_data()? & mask;
                    if found != erased {
                        return Err(Error::VerifyFailed {
                            address,
                            expected: erased,
                            found,
                            attempts: 0,
                        });
                    }
                }
            }
            session.end_phase()?;
            session.begin_phase(Phase::Programming)
        };
        check(session).map_err(|e| Error::abort(None, e))?;
        log::debug!("blank check passed");
        Ok(())
    }

    /// Read a written run back in one pass, rewriting words that differ
    fn verify_run<B, C, P>(
        &mut self,
        session: &mut ProgrammingSession<B, C>,
        run: &WordRun,
        wait: u32,
        progress: &mut P,
    ) -> Result<()>
    where
        B: GpioBackend,
        C: Clock,
        P: FlashProgress + ?Sized,
    {
        let mask = self.profile.word_mask();
        let abort = |last: Option<u32>| move |e: Error| Error::abort(last, e);

        session
            .end_phase()
            .and_then(|_| session.begin_phase(Phase::Verifying))
            .and_then(|_| session.goto(run.start))
            .map_err(abort(self.last_good))?;

        for (i, (address, expected)) in run.iter().enumerate() {
            session.check_cancelled().map_err(abort(self.last_good))?;
            if i > 0 {
                session.increment().map_err(abort(self.last_good))?;
            }
            let mut read = session.read_data().map_err(abort(self.last_good))? & mask;

            // A rewrite leaves the counter on `address`
            let mut attempts = 1;
            while read != expected {
                if attempts > self.options.retries {
                    return Err(Error::VerifyFailed {
                        address,
                        expected,
                        found: read,
                        attempts,
                    });
                }
                log::warn!(
                    "verify mismatch at 0x{:04X}: expected 0x{:04X}, read 0x{:04X} (rewrite {}/{})",
                    address,
                    expected,
                    read,
                    attempts,
                    self.options.retries
                );
                progress.retry(address, attempts);
                read = rewrite_word(session, address, expected, wait)
                    .map_err(abort(self.last_good))?
                    & mask;
                attempts += 1;
                self.report.retries += 1;
            }
            self.report.words_verified += 1;
            self.last_good = Some(address);
        }

        session
            .end_phase()
            .and_then(|_| session.begin_phase(Phase::Programming))
            .map_err(abort(self.last_good))
    }
}

/// Load a latch-aligned chunk and commit it
fn write_chunk<B: GpioBackend, C: Clock>(
    session: &mut ProgrammingSession<B, C>,
    start: u32,
    words: &[u32],
    wait: u32,
) -> Result<()> {
    session.goto(start)?;
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            session.increment()?;
        }
        session.load_word(*word)?;
    }
    session.begin_programming(wait)
}

/// Write one word again from the verifying phase and read it back
fn rewrite_word<B: GpioBackend, C: Clock>(
    session: &mut ProgrammingSession<B, C>,
    address: u32,
    word: u32,
    wait: u32,
) -> Result<u32> {
    session.end_phase()?;
    session.begin_phase(Phase::Programming)?;
    write_chunk(session, address, &[word], wait)?;
    session.end_phase()?;
    session.begin_phase(Phase::Verifying)?;
    session.goto(address)?;
    session.read_data()
}

/// Enter programming mode, run `f`, and leave programming mode again
fn with_programming_mode<B, C, T, F>(session: &mut ProgrammingSession<B, C>, f: F) -> Result<T>
where
    B: GpioBackend,
    C: Clock,
    F: FnOnce(&mut ProgrammingSession<B, C>) -> Result<T>,
{
    session.enter_programming_mode()?;
    let result = f(session);
    match (result, session.exit_programming_mode()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), exit) => {
            if let Err(exit_err) = exit {
                log::warn!("failed to leave programming mode: {}", exit_err);
            }
            Err(e)
        }
    }
}

/// Compare the target against an image without writing
///
/// The first mismatch fails with `VerifyFailed` (zero write attempts).
pub fn verify<B, C, P>(
    session: &mut ProgrammingSession<B, C>,
    image: &MemoryImage,
    progress: &mut P,
) -> Result<FlashReport>
where
    B: GpioBackend,
    C: Clock,
    P: FlashProgress + ?Sized,
{
    let profile = session.profile().clone();
    let plan = WritePlan::from_image(&profile, image)?;
    let mask = profile.word_mask();

    let report = with_programming_mode(session, |session| {
        session.begin_phase(Phase::Verifying)?;
        progress.reading(plan.word_count());
        let mut report = FlashReport::default();
        let mut last = None;
        for run in plan.runs() {
            session.goto(run.start)?;
            for (i, (address, expected)) in run.iter().enumerate() {
                session.check_cancelled().map_err(|e| Error::abort(last, e))?;
                if i > 0 {
                    session.increment()?;
                }
                let found = session.read_data()? & mask;
                if found != expected {
                    return Err(Error::VerifyFailed {
                        address,
                        expected,
                        found,
                        attempts: 0,
                    });
                }
                report.words_verified += 1;
                last = Some(address);
                progress.read_progress(report.words_verified);
            }
        }
        session.end_phase()?;
        Ok(report)
    })?;

    progress.complete(&report);
    log::info!("verified {} words", report.words_verified);
    Ok(report)
}

/// Dump program memory and configuration space into an image
pub fn read_memory<B, C, P>(
    session: &mut ProgrammingSession<B, C>,
    progress: &mut P,
) -> Result<MemoryImage>
where
    B: GpioBackend,
    C: Clock,
    P: FlashProgress + ?Sized,
{
    let profile = session.profile().clone();
    let bytes_per_word = profile.bytes_per_word as u32;
    let regions = profile.regions();
    let total: u32 = regions.iter().map(|(_, r)| r.end - r.start).sum();

    let image = with_programming_mode(session, |session| {
        session.begin_phase(Phase::Verifying)?;
        progress.reading(total as usize);
        let mut image = MemoryImage::new();
        let mut done = 0;
        let mut last = None;
        for (region, range) in regions {
            log::debug!("reading {} memory 0x{:04X}..0x{:04X}", region, range.start, range.end);
            session.goto(range.start)?;
            for address in range.clone() {
                session.check_cancelled().map_err(|e| Error::abort(last, e))?;
                if address > range.start {
                    session.increment()?;
                }
                let word = session.read_data()? & profile.word_mask();
                for lane in 0..bytes_per_word {
                    image.set(address * bytes_per_word + lane, (word >> (8 * lane)) as u8);
                }
                done += 1;
                last = Some(address);
                progress.read_progress(done);
            }
        }
        session.end_phase()?;
        Ok(image)
    })?;

    progress.complete(&FlashReport::default());
    Ok(image)
}

/// Bulk erase program memory and configuration words
pub fn erase<B, C, P>(session: &mut ProgrammingSession<B, C>, progress: &mut P) -> Result<()>
where
    B: GpioBackend,
    C: Clock,
    P: FlashProgress + ?Sized,
{
    let include_config = session.profile().config.is_some();
    with_programming_mode(session, |session| {
        session.begin_phase(Phase::Programming)?;
        session.check_cancelled().map_err(|e| Error::abort(None, e))?;
        progress.erasing(1);
        session.bulk_erase(include_config)?;
        progress.erase_progress(1);
        session.end_phase()
    })?;
    progress.complete(&FlashReport {
        bulk_erased: true,
        ..Default::default()
    });
    log::info!("device erased");
    Ok(())
}
