//! Linux GPIO character device backend
//!
//! Each ICSP signal is requested as its own line request so the data line
//! can be turned around without touching the others. Requests are released
//! when dropped, so the kernel reclaims the lines even if the process dies
//! without running [`GpioBackend::release`].

use std::collections::HashMap;

use crate::error::{LinuxGpioError, Result};

use gpiocdev::chip::Chip;
use gpiocdev::line::Value;
use gpiocdev::request::{Config, Request};

use picgp_core::error::Result as CoreResult;
use picgp_core::gpio::{Direction, GpioBackend, Offset};
use picgp_core::session::PinMap;

/// Consumer label shown by `gpioinfo` for held lines
const CONSUMER: &str = "picgp";

/// Highest chip number accepted by `gpiochip=N`
const MAX_GPIOCHIP: u32 = 9;

/// Configuration for the Linux GPIO backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxGpioConfig {
    /// Device path (e.g., "/dev/gpiochip0")
    pub device: String,
    /// ICSP signal assignment
    pub pins: PinMap,
}

impl LinuxGpioConfig {
    /// Create a configuration for the given device path and pins
    pub fn new(device: impl Into<String>, pins: PinMap) -> Self {
        Self {
            device: device.into(),
            pins,
        }
    }

    /// Check that every signal has its own line
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(LinuxGpioError::NoDevice);
        }
        let offsets = self.pins.offsets();
        for (i, offset) in offsets.iter().enumerate() {
            if offsets[..i].contains(offset) {
                return Err(LinuxGpioError::DuplicateLine(*offset));
            }
        }
        Ok(())
    }
}

/// GPIO backend on a Linux GPIO chip
pub struct LinuxGpioBackend {
    device: String,
    num_lines: u32,
    requests: HashMap<Offset, Request>,
}

impl LinuxGpioBackend {
    /// Open the GPIO chip named in `config`
    ///
    /// Only the chip is opened here; lines are requested by the session.
    pub fn open(config: &LinuxGpioConfig) -> Result<Self> {
        config.validate()?;
        log::debug!("linux_gpio: Opening device {}", config.device);

        let chip = Chip::from_path(&config.device).map_err(|source| LinuxGpioError::ChipOpenFailed {
            path: config.device.clone(),
            source,
        })?;
        let info = chip.info().map_err(|source| LinuxGpioError::ChipOpenFailed {
            path: config.device.clone(),
            source,
        })?;

        for offset in config.pins.offsets() {
            if offset >= info.num_lines {
                return Err(LinuxGpioError::NoSuchLine {
                    chip: config.device.clone(),
                    offset,
                    lines: info.num_lines,
                });
            }
        }

        log::info!(
            "linux_gpio: Opened {} ({}, {} lines) with {}",
            config.device,
            info.label,
            info.num_lines,
            config.pins
        );

        Ok(Self {
            device: config.device.clone(),
            num_lines: info.num_lines,
            requests: HashMap::new(),
        })
    }

    fn line_config(offset: Offset, direction: Direction) -> Config {
        let mut cfg = Config::default();
        match direction {
            Direction::Output => {
                cfg.with_line(offset).as_output(Value::Inactive);
            }
            Direction::Input => {
                cfg.with_line(offset).as_input();
            }
        }
        cfg
    }

    fn request_line(&mut self, offset: Offset, direction: Direction) -> Result<()> {
        if offset >= self.num_lines {
            return Err(LinuxGpioError::NoSuchLine {
                chip: self.device.clone(),
                offset,
                lines: self.num_lines,
            });
        }
        let request = Request::from_config(Self::line_config(offset, direction))
            .on_chip(&self.device)
            .with_consumer(CONSUMER)
            .request()
            .map_err(|source| LinuxGpioError::LineRequestFailed { offset, source })?;
        self.requests.insert(offset, request);
        Ok(())
    }

    fn line(&self, offset: Offset) -> Result<&Request> {
        self.requests
            .get(&offset)
            .ok_or(LinuxGpioError::NotRequested(offset))
    }
}

impl GpioBackend for LinuxGpioBackend {
    fn chip(&self) -> &str {
        &self.device
    }

    fn request(&mut self, offset: Offset, direction: Direction) -> CoreResult<()> {
        self.request_line(offset, direction)
            .map_err(|e| e.into_core(&self.device, offset))?;
        log::debug!("linux_gpio: Requested line {} as {}", offset, direction);
        Ok(())
    }

    fn set_direction(&mut self, offset: Offset, direction: Direction) -> CoreResult<()> {
        let cfg = Self::line_config(offset, direction);
        self.line(offset)
            .and_then(|request| {
                request
                    .reconfigure(&cfg)
                    .map(|_| ())
                    .map_err(LinuxGpioError::ReconfigureFailed)
            })
            .map_err(|e| e.into_core(&self.device, offset))
    }

    fn write(&mut self, offset: Offset, high: bool) -> CoreResult<()> {
        let value = if high { Value::Active } else { Value::Inactive };
        self.line(offset)
            .and_then(|request| {
                request
                    .set_value(offset, value)
                    .map(|_| ())
                    .map_err(LinuxGpioError::SetValueFailed)
            })
            .map_err(|e| e.into_core(&self.device, offset))
    }

    fn read(&mut self, offset: Offset) -> CoreResult<bool> {
        self.line(offset)
            .and_then(|request| request.value(offset).map_err(LinuxGpioError::GetValueFailed))
            .map(|value| value == Value::Active)
            .map_err(|e| e.into_core(&self.device, offset))
    }

    fn release(&mut self, offset: Offset) -> CoreResult<()> {
        match self.requests.remove(&offset) {
            Some(_) => {
                log::debug!("linux_gpio: Released line {}", offset);
                Ok(())
            }
            None => Err(LinuxGpioError::NotRequested(offset).into_core(&self.device, offset)),
        }
    }
}

/// Parse programmer options from a list of key-value pairs
///
/// Options override the values in `base` (usually taken from the
/// configuration file).
///
/// # Supported Options
///
/// - `dev=/dev/gpiochipN` - GPIO chip device path
/// - `gpiochip=N` - GPIO chip number (alternative to dev)
/// - `mclr=N` - MCLR/VPP GPIO line offset
/// - `pgc=N` or `clock=N` - PGC GPIO line offset
/// - `pgd=N` or `data=N` - PGD GPIO line offset
/// - `vdd=N` - VDD switch GPIO line offset (`vdd=none` when VDD is not switched)
pub fn parse_options(
    options: &[(&str, &str)],
    base: LinuxGpioConfig,
) -> std::result::Result<LinuxGpioConfig, LinuxGpioError> {
    let mut config = base;
    let mut dev: Option<String> = None;
    let mut gpiochip: Option<u32> = None;

    let line = |name: &'static str, value: &str| -> Result<Offset> {
        value.parse().map_err(|_| LinuxGpioError::InvalidLineNumber {
            name,
            value: value.to_string(),
        })
    };

    for (key, value) in options {
        match *key {
            "dev" => dev = Some(value.to_string()),
            "gpiochip" => {
                gpiochip = Some(value.parse().map_err(|_| {
                    LinuxGpioError::InvalidParameter(format!("Invalid gpiochip value: {}", value))
                })?);
            }
            "mclr" => config.pins.mclr = line("mclr", value)?,
            "pgc" | "clock" => config.pins.pgc = line("pgc", value)?,
            "pgd" | "data" => config.pins.pgd = line("pgd", value)?,
            "vdd" => {
                config.pins.vdd = match *value {
                    "none" | "" => None,
                    v => Some(line("vdd", v)?),
                }
            }
            _ => {
                log::warn!("linux_gpio: Unknown option: {}={}", key, value);
            }
        }
    }

    match (dev, gpiochip) {
        (Some(_), Some(_)) => {
            return Err(LinuxGpioError::InvalidParameter(
                "Only one of 'dev' or 'gpiochip' can be specified".to_string(),
            ))
        }
        (Some(dev), None) => config.device = dev,
        (None, Some(n)) => {
            if n > MAX_GPIOCHIP {
                return Err(LinuxGpioError::InvalidParameter(format!(
                    "Maximum gpiochip number supported is {}",
                    MAX_GPIOCHIP
                )));
            }
            config.device = format!("/dev/gpiochip{}", n);
        }
        (None, None) => {}
    }

    config.validate()?;
    Ok(config)
}
