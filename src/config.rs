//! Configuration file loading
//!
//! Parses `picgp.conf` files in TOML format:
//!
//! ```toml
//! [gpio]
//! chip = "/dev/gpiochip0"
//! mclr = 22
//! pgc = 27
//! pgd = 17
//! # vdd = 23
//!
//! [timing]
//! clock_half_period = 2
//! program = 3000
//!
//! [programming]
//! programmer = "linux_gpio"
//! device = "PIC16F1823"
//! retries = 3
//! ```
//!
//! Every key is optional. The file is looked up in `--config`, then
//! `$XDG_CONFIG_HOME/picgp/picgp.conf`, `~/.config/picgp/picgp.conf` and
//! `/etc/picgp.conf`.

use std::fs;
use std::path::{Path, PathBuf};

use picgp_core::device::Timing;
use picgp_core::session::PinMap;
use thiserror::Error;

/// Configuration file name
pub const CONFIG_FILE: &str = "picgp.conf";

/// System-wide configuration file
const SYSTEM_CONFIG: &str = "/etc/picgp.conf";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Explicitly requested file does not exist
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid configuration TOML
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// `[gpio]` section: host chip and ICSP wiring
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioSection {
    /// GPIO chip device path
    pub chip: String,
    /// MCLR/VPP line offset
    pub mclr: u32,
    /// PGC line offset
    pub pgc: u32,
    /// PGD line offset
    pub pgd: u32,
    /// VDD switch line offset
    pub vdd: Option<u32>,
}

impl Default for GpioSection {
    fn default() -> Self {
        // Raspberry Pi header pins 15, 13 and 11
        Self {
            chip: "/dev/gpiochip0".to_string(),
            mclr: 22,
            pgc: 27,
            pgd: 17,
            vdd: None,
        }
    }
}

impl GpioSection {
    /// Pin assignment for the session
    pub fn pin_map(&self) -> PinMap {
        PinMap {
            mclr: self.mclr,
            pgc: self.pgc,
            pgd: self.pgd,
            vdd: self.vdd,
        }
    }
}

/// `[timing]` section: per-site overrides in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingOverrides {
    pub clock_half_period: Option<u32>,
    pub entry_hold: Option<u32>,
    pub command_delay: Option<u32>,
    pub program: Option<u32>,
    pub program_config: Option<u32>,
    pub row_erase: Option<u32>,
    pub bulk_erase: Option<u32>,
    pub exit: Option<u32>,
    pub read_timeout: Option<u32>,
}

impl TimingOverrides {
    /// Whether any value is overridden
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Replace the device timing with the overridden values
    pub fn apply(&self, timing: &mut Timing) {
        let fields = [
            (self.clock_half_period, &mut timing.clock_half_period),
            (self.entry_hold, &mut timing.entry_hold),
            (self.command_delay, &mut timing.command_delay),
            (self.program, &mut timing.program),
            (self.program_config, &mut timing.program_config),
            (self.row_erase, &mut timing.row_erase),
            (self.bulk_erase, &mut timing.bulk_erase),
            (self.exit, &mut timing.exit),
            (self.read_timeout, &mut timing.read_timeout),
        ];
        for (value, field) in fields {
            if let Some(value) = value {
                *field = value;
            }
        }
    }
}

/// `[programming]` section: defaults for command line options
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProgrammingSection {
    /// Programmer used when `-p` is not given
    pub programmer: Option<String>,
    /// Device used when `-d` is not given
    pub device: Option<String>,
    /// Rewrites allowed per word
    pub retries: Option<u32>,
}

/// Parsed configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub gpio: GpioSection,
    pub timing: TimingOverrides,
    pub programming: ProgrammingSection,
}

impl Config {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Load the configuration
    ///
    /// An explicit path must exist. Otherwise the first file found in the
    /// default locations is used, and built-in defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for path in search_paths() {
            if path.is_file() {
                log::debug!("Using configuration file {}", path.display());
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        log::debug!("No configuration file found, using defaults");
        Ok((Self::default(), None))
    }
}

/// Default configuration file locations, in search order
pub fn search_paths() -> Vec<PathBuf> {
    search_paths_from(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn search_paths_from(xdg_config_home: Option<PathBuf>, home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = xdg_config_home.filter(|d| d.is_absolute()) {
        paths.push(dir.join("picgp").join(CONFIG_FILE));
    }
    if let Some(home) = home {
        let path = home.join(".config").join("picgp").join(CONFIG_FILE);
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths.push(PathBuf::from(SYSTEM_CONFIG));
    paths
}
