//! picgp - PIC microcontroller programmer using the Linux GPIO
//!
//! Loads Intel HEX images into PIC microcontrollers by bit-banging the ICSP
//! lines (MCLR, PGC, PGD and optionally VDD) from the host's GPIO chip.
//!
//! # Architecture
//!
//! - `picgp-core` holds the protocol, device database, hex loader and the
//!   program/verify orchestration.
//! - Programmers are `GpioBackend` implementations: `linux_gpio` for real
//!   hardware, `dummy` for a simulated target.
//! - This binary resolves configuration, device and programmer, then hands a
//!   session to the selected command.

mod cli;
mod commands;
mod config;
mod programmers;

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands, DeviceArgs};
use config::Config;
use picgp_core::device::{DeviceDatabase, DeviceProfile};
use picgp_core::flash::{ProgramOptions, DEFAULT_RETRIES};

fn main() -> ExitCode {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let cancel = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(&cancel);

    match run(cli, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report_error(e.as_ref()),
    }
}

fn run(cli: Cli, cancel: &Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let (config, config_path) = Config::load(cli.config.as_deref())?;
    if let Some(path) = &config_path {
        log::info!("Loaded configuration from {}", path.display());
    }

    let db = load_device_database(cli.device_db.as_deref())?;
    log::debug!("Loaded {} device definitions", db.len());

    let programmer = cli
        .programmer
        .clone()
        .or_else(|| config.programming.programmer.clone())
        .unwrap_or_else(|| programmers::DEFAULT_PROGRAMMER.to_string());

    match cli.command {
        Commands::Program {
            device,
            input,
            no_verify,
            no_erase,
            blank_check,
            retries,
        } => {
            let options = ProgramOptions {
                erase: !no_erase,
                verify: !no_verify,
                blank_check,
                retries: retries
                    .or(config.programming.retries)
                    .unwrap_or(DEFAULT_RETRIES),
            };
            let session = open_session(&programmer, &config, &db, &device, cancel)?;
            commands::run_program(session, &input, &options)
        }
        Commands::Verify { device, input } => {
            let session = open_session(&programmer, &config, &db, &device, cancel)?;
            commands::run_verify(session, &input)
        }
        Commands::Read { device, output } => {
            let session = open_session(&programmer, &config, &db, &device, cancel)?;
            commands::run_read(session, &output)
        }
        Commands::Erase { device } => {
            let session = open_session(&programmer, &config, &db, &device, cancel)?;
            commands::run_erase(session)
        }
        Commands::Info { input, device } => {
            let profile = device.map(|name| db.resolve(&name)).transpose()?;
            commands::run_info(&input, profile.as_deref())
        }
        Commands::ListDevices { vendor } => {
            commands::list_devices(&db, vendor.as_deref());
            Ok(())
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
    }
}

/// Turn Ctrl-C into a cancel request
///
/// Flash operations stop at the next word and the session puts the lines
/// back to idle. A second Ctrl-C exits at once.
fn install_interrupt_handler(cancel: &Arc<AtomicBool>) {
    let cancel = Arc::clone(cancel);
    let result = ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            eprintln!("Interrupted again, exiting without cleanup");
            std::process::exit(130);
        }
        eprintln!("Interrupted, stopping after the current step...");
    });
    if let Err(e) = result {
        log::warn!("Failed to install Ctrl-C handler: {}", e);
    }
}

/// Load the built-in device database plus any extra definitions
fn load_device_database(path: Option<&Path>) -> Result<DeviceDatabase, Box<dyn std::error::Error>> {
    let mut db = DeviceDatabase::builtin()?;

    if let Some(path) = path {
        if !path.exists() {
            return Err(format!("Device database path not found: {}", path.display()).into());
        }
        let count = db.load_path(path)?;
        log::info!("Loaded {} devices from {}", count, path.display());
    }

    Ok(db)
}

/// Resolve the device, open the programmer and claim its lines
fn open_session(
    programmer: &str,
    config: &Config,
    db: &DeviceDatabase,
    device: &DeviceArgs,
    cancel: &Arc<AtomicBool>,
) -> Result<commands::Session, Box<dyn std::error::Error>> {
    let name = device
        .device
        .as_deref()
        .or(config.programming.device.as_deref())
        .ok_or("No device specified. Use -d <device> or set [programming] device in picgp.conf")?;
    let listed = db.resolve(name)?;
    let profile = apply_timing(&listed, config);

    let programmer = programmers::open_programmer(programmer, config, &listed)?;
    commands::open_session(programmer, profile, Arc::clone(cancel))
}

/// Device profile with the configuration's timing overrides applied
fn apply_timing(profile: &Arc<DeviceProfile>, config: &Config) -> Arc<DeviceProfile> {
    if config.timing.is_empty() {
        return Arc::clone(profile);
    }
    let mut profile = DeviceProfile::clone(profile);
    config.timing.apply(&mut profile.timing);
    log::debug!("Timing for {}: {:?}", profile.name, profile.timing);
    Arc::new(profile)
}

/// Print an error and pick the exit code for it
fn report_error(e: &(dyn std::error::Error + 'static)) -> ExitCode {
    match e.downcast_ref::<picgp_core::Error>() {
        Some(core) => {
            let kind = core.kind();
            eprintln!("Error [{}]: {}", kind.name(), core);
            if let Some(address) = core.address() {
                eprintln!("Last address: 0x{:04X}", address);
            }
            ExitCode::from(kind.exit_code())
        }
        None => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
