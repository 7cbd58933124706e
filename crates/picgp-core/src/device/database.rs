//! Device database for runtime loading and lookup
//!
//! Device definitions live in RON vendor files. The Microchip file shipped
//! with the crate is compiled in; more files can be loaded at runtime and
//! override built-in entries of the same name.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::profile::{
    Commands, ConfigSpace, DeviceId, DeviceProfile, Encoding, EntryMode, EntrySequence, Timing,
};
use super::Quirks;
use crate::error::Error;

/// Built-in device definitions
const BUILTIN_MICROCHIP: &str = include_str!("../../devices/microchip.ron");

/// Error type for device database operations
#[derive(Debug, thiserror::Error)]
pub enum DeviceDbError {
    /// I/O error reading files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RON parsing error
    #[error("parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Definition is inconsistent
    #[error("invalid definition for {device}: {reason}")]
    Validation {
        /// Device name
        device: String,
        /// What is wrong with it
        reason: String,
    },
}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Quirk flags (RON format)
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(default)]
struct QuirksDef {
    key_trailing_clock: bool,
    vpp_before_vdd: bool,
}

impl From<QuirksDef> for Quirks {
    fn from(def: QuirksDef) -> Self {
        let mut q = Quirks::empty();
        if def.key_trailing_clock {
            q |= Quirks::KEY_TRAILING_CLOCK;
        }
        if def.vpp_before_vdd {
            q |= Quirks::VPP_BEFORE_VDD;
        }
        q
    }
}

/// Single device definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct DeviceDef {
    name: String,
    program_words: u32,
    word_bits: u8,
    #[serde(default = "default_bytes_per_word")]
    bytes_per_word: u8,
    #[serde(default)]
    erase_block_words: Option<u32>,
    #[serde(default = "default_write_latch_words")]
    write_latch_words: u32,
    #[serde(default)]
    config: Option<ConfigSpace>,
    #[serde(default)]
    device_id: Option<DeviceId>,
    encoding: Encoding,
    entry: EntrySequence,
    commands: Commands,
    #[serde(default)]
    timing: Timing,
    #[serde(default)]
    quirks: QuirksDef,
}

fn default_bytes_per_word() -> u8 {
    2
}

fn default_write_latch_words() -> u32 {
    1
}

/// Vendor definition containing multiple devices
#[derive(Debug, Clone, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    devices: Vec<DeviceDef>,
}

fn validate(p: &DeviceProfile) -> Result<(), String> {
    if p.program_words == 0 {
        return Err("program memory is empty".into());
    }
    if p.word_bits == 0 || p.word_bits > 24 {
        return Err(format!("unsupported word width {}", p.word_bits));
    }
    if !(1..=4).contains(&p.bytes_per_word) || (p.bytes_per_word as u32) * 8 < p.word_bits as u32 {
        return Err(format!(
            "{} bytes per word cannot hold {}-bit words",
            p.bytes_per_word, p.word_bits
        ));
    }
    let enc = &p.encoding;
    if !(1..=8).contains(&enc.command_bits) {
        return Err(format!("command width {} out of range", enc.command_bits));
    }
    if enc.payload_bits > 32 {
        return Err(format!("payload width {} out of range", enc.payload_bits));
    }
    if enc.field_bits() < p.word_bits {
        return Err(format!(
            "payload field of {} bits cannot carry {}-bit words",
            enc.field_bits(),
            p.word_bits
        ));
    }
    if p.write_latch_words == 0 {
        return Err("write latch size must be at least one word".into());
    }
    match (p.erase_block_words, p.commands.row_erase) {
        (Some(0), _) => return Err("row size must be at least one word".into()),
        (Some(_), None) => return Err("row size given without a row erase command".into()),
        (None, Some(_)) => return Err("row erase command given without a row size".into()),
        _ => {}
    }
    if let Some(config) = p.config {
        if p.commands.load_configuration.is_none() && p.commands.load_address.is_none() {
            return Err("configuration space is unreachable without load configuration or load address".into());
        }
        if config.base < p.program_words {
            return Err("configuration space overlaps program memory".into());
        }
    }
    if let Some(id) = p.device_id {
        if p.region_of(id.address).is_none() {
            return Err(format!("device ID address 0x{:X} is outside device memory", id.address));
        }
    }
    if p.entry.mode == EntryMode::LowVoltage {
        if p.entry.key.is_none() {
            return Err("low-voltage entry needs a key".into());
        }
        if p.entry.key_bits == 0 || p.entry.key_bits > 32 {
            return Err(format!("key width {} out of range", p.entry.key_bits));
        }
    }
    Ok(())
}

// ============================================================================
// Device database
// ============================================================================

/// Runtime device database
#[derive(Debug, Clone, Default)]
pub struct DeviceDatabase {
    devices: Vec<DeviceProfile>,
}

impl DeviceDatabase {
    /// Create an empty device database
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Database holding the built-in definitions
    pub fn builtin() -> Result<Self, DeviceDbError> {
        let mut db = Self::new();
        db.load_ron(BUILTIN_MICROCHIP)?;
        Ok(db)
    }

    /// Load device definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, DeviceDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load device definitions from a RON string
    ///
    /// A definition whose name matches an existing device replaces it.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, DeviceDbError> {
        let vendor_def: VendorDef = ron::from_str(content)?;
        let count = vendor_def.devices.len();

        for def in vendor_def.devices {
            let profile = DeviceProfile {
                vendor: vendor_def.vendor.clone(),
                name: def.name,
                program_words: def.program_words,
                word_bits: def.word_bits,
                bytes_per_word: def.bytes_per_word,
                erase_block_words: def.erase_block_words,
                write_latch_words: def.write_latch_words,
                config: def.config,
                device_id: def.device_id,
                encoding: def.encoding,
                entry: def.entry,
                commands: def.commands,
                timing: def.timing,
                quirks: def.quirks.into(),
            };
            validate(&profile).map_err(|reason| DeviceDbError::Validation {
                device: profile.name.clone(),
                reason,
            })?;

            match self
                .devices
                .iter_mut()
                .find(|d| d.name.eq_ignore_ascii_case(&profile.name))
            {
                Some(existing) => {
                    log::debug!("device database: {} overrides earlier definition", profile.name);
                    *existing = profile;
                }
                None => self.devices.push(profile),
            }
        }

        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, DeviceDbError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "ron") {
                paths.push(path);
            }
        }
        // Deterministic override order
        paths.sort();

        let mut total = 0;
        for path in paths {
            total += self.load_file(&path)?;
        }
        Ok(total)
    }

    /// Load a file or every RON file in a directory
    pub fn load_path(&mut self, path: &Path) -> Result<usize, DeviceDbError> {
        if path.is_dir() {
            self.load_dir(path)
        } else {
            self.load_file(path)
        }
    }

    /// Get all devices in the database
    pub fn devices(&self) -> &[DeviceProfile] {
        &self.devices
    }

    /// Get the number of devices in the database
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Find a device by exact name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Find a device by name and hand out a shared profile
    pub fn resolve(&self, name: &str) -> crate::Result<Arc<DeviceProfile>> {
        self.find(name)
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| Error::UnknownDevice(name.to_string()))
    }

    /// Find devices by name (case-insensitive partial match)
    pub fn search(&self, name: &str) -> Vec<&DeviceProfile> {
        let name_lower = name.to_lowercase();
        self.devices
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&name_lower))
            .collect()
    }

    /// Iterate over all devices
    pub fn iter(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.devices.iter()
    }
}
