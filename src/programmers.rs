//! Programmer registration and dispatch
//!
//! This module provides a centralized registry for all programmers, with support
//! for feature-gated inclusion and dynamic help text generation.

use std::sync::Arc;

use picgp_core::device::DeviceProfile;
use picgp_core::gpio::{Clock, GpioBackend};
use picgp_core::session::PinMap;

use crate::config::Config;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Programmer used when neither `-p` nor the configuration file names one
pub const DEFAULT_PROGRAMMER: &str = "linux_gpio";

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "linux-gpio")]
    programmers.push(ProgrammerInfo {
        name: "linux_gpio",
        aliases: &["linux-gpio", "gpio"],
        description: "Linux GPIO character device (dev=/dev/gpiochipN,mclr=<n>,pgc=<n>,pgd=<n>,vdd=<n>)",
    });

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &["sim"],
        description: "Simulated PIC for dry runs (device_id=<id>,preload=<file.hex>)",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:12} - {}\n", p.name, p.description));
    }
    help
}

/// Canonical name of a programmer, matching aliases
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// An opened programmer, ready to start a session
pub struct Programmer {
    /// Host GPIO access
    pub backend: Box<dyn GpioBackend>,
    /// Time source for the session
    pub clock: Box<dyn Clock>,
    /// ICSP wiring
    pub pins: PinMap,
}

/// Open the programmer named by `programmer`
///
/// The programmer string can be just the name (e.g., "linux_gpio") or include
/// parameters (e.g., "linux_gpio:gpiochip=1,pgd=4"). Parameters override the
/// `[gpio]` section of the configuration. `profile` is the device as listed in
/// the database.
#[allow(unused_variables)]
pub fn open_programmer(
    programmer: &str,
    config: &Config,
    profile: &Arc<DeviceProfile>,
) -> Result<Programmer, Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = match find_programmer(name) {
        Some(n) => n,
        None => return Err(unknown_programmer_error(name)),
    };

    match canonical_name {
        #[cfg(feature = "linux-gpio")]
        "linux_gpio" => {
            use picgp_core::gpio::StdClock;
            use picgp_linux_gpio::{parse_options, LinuxGpioBackend, LinuxGpioConfig};

            let base = LinuxGpioConfig::new(config.gpio.chip.clone(), config.gpio.pin_map());
            let gpio_config = parse_options(&options, base).map_err(|e| {
                log::error!("Invalid linux_gpio parameters");
                e.into_core(&config.gpio.chip, config.gpio.mclr)
            })?;

            log::info!("Opening Linux GPIO programmer...");
            let backend = LinuxGpioBackend::open(&gpio_config).map_err(|e| {
                log::error!(
                    "Make sure {} exists and you have read/write permissions. \
                     You may need to: sudo usermod -aG gpio $USER",
                    gpio_config.device
                );
                e.into_core(&gpio_config.device, gpio_config.pins.mclr)
            })?;

            Ok(Programmer {
                backend: Box::new(backend),
                clock: Box::new(StdClock::new()),
                pins: gpio_config.pins,
            })
        }

        #[cfg(feature = "dummy")]
        "dummy" => {
            use picgp_core::flash::WritePlan;
            use picgp_core::gpio::SimClock;
            use picgp_dummy::{DummyConfig, SimulatedPic};

            let mut dummy_config = DummyConfig::default();
            let mut preload = None;
            for (key, value) in &options {
                match *key {
                    "device_id" => dummy_config.device_id = Some(parse_number(value)?),
                    "preload" => preload = Some(*value),
                    _ => log::warn!("dummy: Unknown option: {}={}", key, value),
                }
            }

            let pins = dummy_config.pins;
            let pic = SimulatedPic::new(Arc::clone(profile), dummy_config, SimClock::new());
            if let Some(path) = preload {
                let image = picgp_core::image::parse_file(path)?;
                let plan = WritePlan::from_image(profile, &image)?;
                let handle = pic.handle();
                for run in plan.runs() {
                    handle.load(run.start, &run.words);
                }
                log::info!("dummy: Preloaded {} words from {}", plan.word_count(), path);
            }

            log::info!("Using simulated {}", profile.name);
            let clock = pic.clock();
            Ok(Programmer {
                backend: Box::new(pic),
                clock: Box::new(clock),
                pins,
            })
        }

        _ => Err(unknown_programmer_error(name)),
    }
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

/// Parse a number that can be hex (0x...) or decimal
#[allow(dead_code)]
fn parse_number(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex: {}", e))
    } else {
        s.parse().map_err(|e| format!("invalid number: {}", e))
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'picgp list-programmers' for more details");
    msg.into()
}
