//! Full program/verify/read/erase cycles against the simulated target

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use picgp_core::device::{DeviceDatabase, DeviceProfile};
use picgp_core::error::{Error, ErrorKind};
use picgp_core::flash::{self, FlashProgress, FlashReport, NoProgress, ProgramOptions};
use picgp_core::gpio::{LineRegistry, SimClock};
use picgp_core::image::{self, MemoryImage};
use picgp_core::protocol::ProtocolState;
use picgp_core::session::ProgrammingSession;
use picgp_dummy::{DummyConfig, SimHandle, SimulatedPic};
use proptest::prelude::*;

type SimSession = ProgrammingSession<SimulatedPic, SimClock>;

fn profile(name: &str) -> Arc<DeviceProfile> {
    DeviceDatabase::builtin().unwrap().resolve(name).unwrap()
}

fn open_with(name: &str, config: DummyConfig, registry: LineRegistry) -> (SimSession, SimHandle) {
    let pins = config.pins;
    let pic = SimulatedPic::new(profile(name), config, SimClock::new());
    let handle = pic.handle();
    let clock = pic.clock();
    let session = ProgrammingSession::open(pic, clock, registry, &pins, profile(name)).unwrap();
    (session, handle)
}

fn open(name: &str) -> (SimSession, SimHandle) {
    open_with(name, DummyConfig::default(), LineRegistry::new())
}

/// Byte image of 14-bit words starting at word `start`
fn words_image(start: u32, words: &[u32]) -> MemoryImage {
    let mut image = MemoryImage::new();
    for (i, word) in words.iter().enumerate() {
        let address = (start + i as u32) * 2;
        image.set(address, *word as u8);
        image.set(address + 1, (*word >> 8) as u8);
    }
    image
}

fn pattern(len: usize) -> Vec<u32> {
    (0..len as u32).map(|i| (i * 0x0123 + 0x0055) & 0x3FFF).collect()
}

#[derive(Default)]
struct Recorder {
    writing: usize,
    written: usize,
    retries: Vec<(u32, u32)>,
    completed: Option<FlashReport>,
}

impl FlashProgress for Recorder {
    fn reading(&mut self, _total_words: usize) {}
    fn read_progress(&mut self, _words_read: usize) {}
    fn erasing(&mut self, _blocks_to_erase: usize) {}
    fn erase_progress(&mut self, _blocks_erased: usize) {}
    fn writing(&mut self, words_to_write: usize) {
        self.writing = words_to_write;
    }
    fn write_progress(&mut self, words_written: usize) {
        self.written = words_written;
    }
    fn retry(&mut self, address: u32, attempt: u32) {
        self.retries.push((address, attempt));
    }
    fn complete(&mut self, report: &FlashReport) {
        self.completed = Some(report.clone());
    }
}

#[test]
fn test_program_then_verify() {
    let (mut session, handle) = open("PIC16F1823");
    let words = pattern(40);
    let image = words_image(0, &words);

    let mut progress = Recorder::default();
    let report = flash::program(&mut session, &image, &ProgramOptions::default(), &mut progress).unwrap();
    assert_eq!(report.words_written, 40);
    assert_eq!(report.words_verified, 40);
    assert_eq!(report.retries, 0);
    assert_eq!(progress.writing, 40);
    assert_eq!(progress.written, 40);
    assert_eq!(progress.completed, Some(report));

    assert_eq!(&handle.program_memory()[..40], &words[..]);
    assert_eq!(handle.word(40), Some(0x3FFF));
    assert_eq!(handle.timing_violations(), 0);
    assert_eq!(handle.contentions(), 0);
    assert_eq!(session.state(), ProtocolState::Disconnected);
    assert!(!handle.in_programming_mode());

    let verified = flash::verify(&mut session, &image, &mut NoProgress).unwrap();
    assert_eq!(verified.words_verified, 40);
    session.close().unwrap();
    assert!(handle.requested_lines().is_empty());
}

#[test]
fn test_blink_hex_with_config() {
    let (mut session, handle) = open("PIC16F1823");
    let text = "\
:0400000001308C003F
:02000004000
:020000040001F9
:02000E00E43FCD
:00000001FF
";
    // The second line is malformed on purpose: parsing must fail first
    assert_eq!(image::parse_str(text).unwrap_err().kind(), ErrorKind::CorruptImage);

    let text = "\
:0400000001308C003F
:020000040001F9
:02000E00E43FCD
:00000001FF
";
    let image = image::parse_str(text).unwrap();
    let report = flash::program(&mut session, &image, &ProgramOptions::default(), &mut NoProgress).unwrap();
    assert!(report.bulk_erased);
    assert_eq!(report.words_written, 3);
    assert_eq!(handle.word(0), Some(0x3001));
    assert_eq!(handle.word(1), Some(0x008C));
    assert_eq!(handle.word(0x8007), Some(0x3FE4));
    // Device ID is untouched by the bulk erase
    assert_eq!(handle.word(0x8006), Some(0x2720));
}

#[test]
fn test_row_erase_keeps_other_rows() {
    let (mut session, handle) = open("PIC16F1823");
    handle.load(0, &[0; 96]);
    let words = pattern(10);
    let report =
        flash::program(&mut session, &words_image(34, &words), &ProgramOptions::default(), &mut NoProgress).unwrap();
    assert_eq!(report.rows_erased, 1);
    assert!(!report.bulk_erased);

    let memory = handle.program_memory();
    assert!(memory[..32].iter().all(|w| *w == 0));
    assert_eq!(&memory[32..34], &[0x3FFF, 0x3FFF]);
    assert_eq!(&memory[34..44], &words[..]);
    assert!(memory[44..64].iter().all(|w| *w == 0x3FFF));
    assert!(memory[64..96].iter().all(|w| *w == 0));
}

#[test]
fn test_transient_read_error_is_retried() {
    let (mut session, handle) = open("PIC16F1823");
    handle.flip_reads(3, 1);
    let options = ProgramOptions {
        retries: 1,
        ..Default::default()
    };
    let mut progress = Recorder::default();
    let report = flash::program(&mut session, &words_image(0, &pattern(8)), &options, &mut progress).unwrap();
    assert_eq!(report.retries, 1);
    assert_eq!(report.words_verified, 8);
    assert_eq!(progress.retries, vec![(3, 1)]);
}

#[test]
fn test_dropped_write_is_rewritten() {
    let (mut session, handle) = open("PIC16F1823");
    handle.fail_writes(4, 1);
    let words = pattern(8);
    let report =
        flash::program(&mut session, &words_image(0, &words), &ProgramOptions::default(), &mut NoProgress).unwrap();
    assert_eq!(report.retries, 1);
    assert_eq!(handle.word(4), Some(words[4]));
}

#[test]
fn test_persistent_mismatch_fails_verify() {
    let (mut session, handle) = open("PIC16F1823");
    handle.flip_reads(3, 100);
    let options = ProgramOptions {
        retries: 2,
        ..Default::default()
    };
    let words = pattern(8);
    let err = flash::program(&mut session, &words_image(0, &words), &options, &mut NoProgress).unwrap_err();
    match err {
        Error::VerifyFailed {
            address,
            expected,
            found,
            attempts,
        } => {
            assert_eq!(address, 3);
            assert_eq!(expected, words[3]);
            assert_eq!(found, words[3] ^ 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Programming mode is left even on failure
    assert_eq!(session.state(), ProtocolState::Disconnected);
    assert!(!handle.in_programming_mode());
}

#[test]
fn test_without_verify_no_reads() {
    let (mut session, handle) = open("PIC16F1823");
    handle.flip_reads(3, 100);
    let options = ProgramOptions {
        verify: false,
        ..Default::default()
    };
    let report = flash::program(&mut session, &words_image(0, &pattern(8)), &options, &mut NoProgress).unwrap();
    assert_eq!(report.words_verified, 0);
    assert_eq!(report.words_written, 8);
}

#[test]
fn test_stalled_line_aborts() {
    let (mut session, handle) = open("PIC16F1823");
    handle.stall_reads(10_000);
    let err = flash::program(&mut session, &words_image(0, &pattern(4)), &ProgramOptions::default(), &mut NoProgress)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FlashAbort);
    assert_eq!(err.address(), None);
    match err {
        Error::FlashAbort { source, .. } => assert_eq!(source.kind(), ErrorKind::IoTimeout),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!handle.in_programming_mode());
}

#[test]
fn test_handshake_mismatch_aborts() {
    let config = DummyConfig {
        device_id: Some(0x1234),
        ..Default::default()
    };
    let (mut session, handle) = open_with("PIC16F1823", config, LineRegistry::new());
    let err = flash::program(&mut session, &words_image(0, &pattern(4)), &ProgramOptions::default(), &mut NoProgress)
        .unwrap_err();
    match err {
        Error::FlashAbort { last_address, source } => {
            assert_eq!(last_address, None);
            assert_eq!(
                *source,
                Error::HandshakeFailed {
                    expected: 0x2720,
                    found: 0x1220,
                }
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(handle.program_memory().iter().all(|w| *w == 0x3FFF));
    assert_eq!(session.state(), ProtocolState::Disconnected);
}

#[test]
fn test_out_of_bounds_image_has_no_side_effects() {
    let (mut session, handle) = open("PIC16F1823");
    let commands = handle.commands();
    let err = flash::program(&mut session, &words_image(0x0800, &[0]), &ProgramOptions::default(), &mut NoProgress)
        .unwrap_err();
    assert_eq!(err, Error::AddressOutOfBounds { address: 0x1000 });
    assert_eq!(handle.commands(), commands);
    assert_eq!(handle.entries(), 0);
}

#[test]
fn test_verify_reports_first_mismatch() {
    let (mut session, handle) = open("PIC16F1823");
    let words = pattern(16);
    handle.load(0, &words);
    handle.load(5, &[0]);
    let err = flash::verify(&mut session, &words_image(0, &words), &mut NoProgress).unwrap_err();
    assert_eq!(
        err,
        Error::VerifyFailed {
            address: 5,
            expected: words[5],
            found: 0,
            attempts: 0,
        }
    );
}

#[test]
fn test_read_memory_matches_target() {
    let (mut session, handle) = open("PIC16F1823");
    handle.load(0, &pattern(64));
    handle.load(0x8007, &[0x3FE4, 0x1EFF]);
    let image = flash::read_memory(&mut session, &mut NoProgress).unwrap();
    assert_eq!(image, handle.to_image());
    // 2048 program words plus 11 configuration words, 2 bytes each
    assert_eq!(image.len(), (2048 + 11) * 2);
    assert_eq!(image.get(0x1000C), Some(0x20));
    assert_eq!(image.get(0x1000D), Some(0x27));
}

#[test]
fn test_erase_clears_config_but_not_id() {
    let (mut session, handle) = open("PIC16F1823");
    handle.load(0, &[0; 2048]);
    handle.load(0x8000, &[0; 4]);
    handle.load(0x8007, &[0x0123]);
    flash::erase(&mut session, &mut NoProgress).unwrap();
    assert!(handle.program_memory().iter().all(|w| *w == 0x3FFF));
    assert_eq!(handle.word(0x8000), Some(0x3FFF));
    assert_eq!(handle.word(0x8007), Some(0x3FFF));
    assert_eq!(handle.word(0x8006), Some(0x2720));
    assert_eq!(handle.timing_violations(), 0);
}

#[test]
fn test_blank_check_detects_leftover_data() {
    let (mut session, handle) = open("PIC16F1823");
    handle.load(2, &[0]);
    let options = ProgramOptions {
        erase: false,
        blank_check: true,
        ..Default::default()
    };
    let err = flash::program(&mut session, &words_image(0, &pattern(4)), &options, &mut NoProgress).unwrap_err();
    match err {
        Error::FlashAbort { source, .. } => assert_eq!(
            *source,
            Error::VerifyFailed {
                address: 2,
                expected: 0x3FFF,
                found: 0,
                attempts: 0,
            }
        ),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_second_session_is_busy() {
    let registry = LineRegistry::new();
    let (first, _) = open_with("PIC16F1823", DummyConfig::default(), registry.clone());

    let pins = DummyConfig::default().pins;
    let pic = SimulatedPic::new_default(profile("PIC16F1823"));
    let clock = pic.clock();
    let err = ProgrammingSession::open(pic, clock, registry.clone(), &pins, profile("PIC16F1823"))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::ResourceBusy);
    // The failed open gave back everything it claimed
    assert_eq!(registry.claimed_count(), 4);

    first.close().unwrap();
    assert_eq!(registry.claimed_count(), 0);
    let pic = SimulatedPic::new_default(profile("PIC16F1823"));
    let clock = pic.clock();
    assert!(ProgrammingSession::open(pic, clock, registry, &pins, profile("PIC16F1823")).is_ok());
}

#[test]
fn test_denied_line_fails_open() {
    let registry = LineRegistry::new();
    let pic = SimulatedPic::new_default(profile("PIC16F1823"));
    pic.handle().deny_line(2);
    let clock = pic.clock();
    let pins = DummyConfig::default().pins;
    let err = ProgrammingSession::open(pic, clock, registry.clone(), &pins, profile("PIC16F1823"))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert_eq!(registry.claimed_count(), 0);
}

#[test]
fn test_high_voltage_part() {
    let (mut session, handle) = open("PIC16F84A");
    let words = pattern(20);
    let mut image = words_image(0, &words);
    image.extend(words_image(0x2007, &[0x3FF1]).iter());
    let report = flash::program(&mut session, &image, &ProgramOptions::default(), &mut NoProgress).unwrap();
    assert!(report.bulk_erased);
    assert_eq!(report.words_verified, 21);
    assert_eq!(&handle.program_memory()[..20], &words[..]);
    assert_eq!(handle.word(0x2007), Some(0x3FF1));
    assert_eq!(handle.timing_violations(), 0);
}

#[test]
fn test_msb_first_part_with_load_address() {
    let (mut session, handle) = open("PIC16F18446");
    let words = pattern(48);
    let report = flash::program(&mut session, &words_image(100, &words), &ProgramOptions::default(), &mut NoProgress)
        .unwrap();
    assert_eq!(report.rows_erased, 2);
    assert_eq!(&handle.program_memory()[100..148], &words[..]);
    assert_eq!(handle.contentions(), 0);
    flash::verify(&mut session, &words_image(100, &words), &mut NoProgress).unwrap();
}

#[test]
fn test_session_drop_releases_lines() {
    let registry = LineRegistry::new();
    let handle = {
        let (mut session, handle) = open_with("PIC16F1823", DummyConfig::default(), registry.clone());
        session.enter_programming_mode().unwrap();
        handle
    };
    assert!(!handle.in_programming_mode());
    assert!(handle.requested_lines().is_empty());
    assert_eq!(registry.claimed_count(), 0);
}

/// Requests cancellation once the first chunk has been written
struct CancelAfterFirstChunk(Arc<AtomicBool>);

impl FlashProgress for CancelAfterFirstChunk {
    fn reading(&mut self, _total_words: usize) {}
    fn read_progress(&mut self, _words_read: usize) {}
    fn erasing(&mut self, _blocks_to_erase: usize) {}
    fn erase_progress(&mut self, _blocks_erased: usize) {}
    fn writing(&mut self, _words_to_write: usize) {}
    fn write_progress(&mut self, _words_written: usize) {
        self.0.store(true, Ordering::SeqCst);
    }
    fn retry(&mut self, _address: u32, _attempt: u32) {}
    fn complete(&mut self, _report: &FlashReport) {}
}

#[test]
fn test_cancel_stops_program_and_idles_lines() {
    let registry = LineRegistry::new();
    let (mut session, handle) = open_with("PIC16F1823", DummyConfig::default(), registry.clone());
    let cancel = Arc::new(AtomicBool::new(false));
    session.set_cancel_flag(Arc::clone(&cancel));

    let words = pattern(40);
    let options = ProgramOptions {
        verify: false,
        ..Default::default()
    };
    let mut progress = CancelAfterFirstChunk(Arc::clone(&cancel));
    let err = flash::program(&mut session, &words_image(0, &words), &options, &mut progress).unwrap_err();
    match err {
        Error::FlashAbort { last_address, source } => {
            // One 16-word latch went out before the flag was seen
            assert_eq!(last_address, Some(15));
            assert_eq!(*source, Error::Interrupted);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(session.is_cancelled());
    assert_eq!(session.state(), ProtocolState::Disconnected);
    assert!(!handle.in_programming_mode());
    assert_eq!(handle.timing_violations(), 0);
    assert_eq!(&handle.program_memory()[..16], &words[..16]);
    assert_eq!(handle.word(16), Some(0x3FFF));

    // Later operations on the cancelled session stop before touching memory
    let err = flash::verify(&mut session, &words_image(0, &words[..16]), &mut NoProgress).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FlashAbort);
    assert!(!handle.in_programming_mode());

    drop(session);
    assert!(handle.requested_lines().is_empty());
    assert_eq!(registry.claimed_count(), 0);
}

/// Commands decoded by a fresh target while programming `len` words
fn program_commands(len: usize, verify: bool) -> usize {
    let (mut session, handle) = open("PIC16F1847");
    let options = ProgramOptions {
        verify,
        ..Default::default()
    };
    flash::program(&mut session, &words_image(0, &pattern(len)), &options, &mut NoProgress).unwrap();
    handle.commands()
}

#[test]
fn test_verify_cost_is_linear() {
    let plain_512 = program_commands(512, false);
    let verified_512 = program_commands(512, true);
    let verified_1024 = program_commands(1024, true);

    // Read back adds a read and an increment per word
    assert!(verified_512 < plain_512 * 2, "{} vs {}", verified_512, plain_512);
    assert!(
        verified_1024 * 10 < verified_512 * 22,
        "{} vs {}",
        verified_1024,
        verified_512
    );
}

/// Word addresses of PIC16F1823 that an image may carry
fn writable_address() -> impl Strategy<Value = u32> {
    let profile = profile("PIC16F1823");
    let config: Vec<u32> = profile
        .config
        .map(|space| {
            (space.base..space.end())
                .filter(|a| profile.is_writable(*a))
                .collect()
        })
        .unwrap_or_default();
    prop_oneof![
        4 => 0..profile.program_words,
        1 => prop::sample::select(config),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_sparse_image_matches_readback(
        words in prop::collection::btree_map(writable_address(), 0u32..0x4000, 1..24),
    ) {
        let (mut session, handle) = open("PIC16F1823");
        let words: BTreeMap<u32, u32> = words;
        let mut image = MemoryImage::new();
        for (&address, &word) in &words {
            image.set(address * 2, word as u8);
            image.set(address * 2 + 1, (word >> 8) as u8);
        }
        let report = flash::program(&mut session, &image, &ProgramOptions::default(), &mut NoProgress).unwrap();
        prop_assert_eq!(report.words_written, words.len());
        for (&address, &word) in &words {
            prop_assert_eq!(handle.word(address), Some(word), "word 0x{:04X}", address);
        }
        prop_assert_eq!(handle.timing_violations(), 0);
        prop_assert_eq!(handle.contentions(), 0);
    }

    #[test]
    fn prop_program_matches_image(
        start in 0u32..1900,
        words in prop::collection::vec(0u32..0x4000, 1..120),
    ) {
        let (mut session, handle) = open("PIC16F1823");
        let image = words_image(start, &words);
        let report = flash::program(&mut session, &image, &ProgramOptions::default(), &mut NoProgress).unwrap();
        prop_assert_eq!(report.words_written, words.len());
        let memory = handle.program_memory();
        let start = start as usize;
        prop_assert_eq!(&memory[start..start + words.len()], &words[..]);
        prop_assert_eq!(handle.timing_violations(), 0);
    }
}
