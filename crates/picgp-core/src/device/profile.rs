//! Device profile types
//!
//! A [`DeviceProfile`] describes everything the protocol engine and the
//! flash orchestrator need to know about one PIC variant. Variation between
//! devices is expressed as data here, never as per-device code.

use super::Quirks;

/// Bit order on the data line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub enum BitOrder {
    /// Least significant bit clocked first
    LsbFirst,
    /// Most significant bit clocked first
    MsbFirst,
}

/// Serial framing of commands and payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct Encoding {
    /// Bit order of command and payload frames
    pub bit_order: BitOrder,
    /// Width of a command frame
    pub command_bits: u8,
    /// Width of a payload frame, including start/stop padding
    pub payload_bits: u8,
    /// Position of the data field inside the payload frame
    pub data_shift: u8,
}

impl Encoding {
    /// Width of the data field carried by a payload frame
    ///
    /// The bit above the field is the stop bit.
    pub fn field_bits(&self) -> u8 {
        self.payload_bits
            .saturating_sub(self.data_shift)
            .saturating_sub(1)
    }

    /// Mask covering the data field
    pub fn field_mask(&self) -> u32 {
        mask(self.field_bits())
    }
}

/// How programming mode is entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
pub enum EntryMode {
    /// MCLR held low while a key sequence is clocked in
    LowVoltage,
    /// VPP applied on MCLR
    HighVoltage,
}

/// Programming mode entry sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct EntrySequence {
    /// Entry method
    pub mode: EntryMode,
    /// Key clocked in after MCLR goes low (low-voltage entry only)
    #[serde(default)]
    pub key: Option<u32>,
    /// Number of key bits
    #[serde(default = "default_key_bits")]
    pub key_bits: u8,
    /// Bit order of the key
    #[serde(default = "default_key_order")]
    pub key_order: BitOrder,
}

fn default_key_bits() -> u8 {
    32
}

fn default_key_order() -> BitOrder {
    BitOrder::LsbFirst
}

/// ICSP command opcodes
///
/// Optional commands are absent on devices that do not implement them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct Commands {
    /// Move the address counter to the configuration space base (payload ignored)
    #[serde(default)]
    pub load_configuration: Option<u8>,
    /// Load a word into the write latch at the current address
    pub load_data: u8,
    /// Read the word at the current address
    pub read_data: u8,
    /// Advance the address counter by one word
    pub increment_address: u8,
    /// Reset the address counter to zero
    #[serde(default)]
    pub reset_address: Option<u8>,
    /// Set the address counter from the payload
    #[serde(default)]
    pub load_address: Option<u8>,
    /// Commit the write latches (self-timed)
    pub begin_programming: u8,
    /// Erase program memory (and configuration space when addressed there)
    pub bulk_erase: u8,
    /// Erase the row containing the current address
    #[serde(default)]
    pub row_erase: Option<u8>,
}

impl Commands {
    /// Whether `opcode` is followed by a host-driven payload frame
    pub fn takes_payload(&self, opcode: u8) -> bool {
        opcode == self.load_data
            || self.load_configuration == Some(opcode)
            || self.load_address == Some(opcode)
    }
}

/// Configuration word space
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct ConfigSpace {
    /// First word address
    pub base: u32,
    /// Number of words
    pub words: u32,
}

impl ConfigSpace {
    /// Whether a word address falls inside the space
    pub fn contains(&self, address: u32) -> bool {
        address >= self.base && address - self.base < self.words
    }

    /// One past the last word address
    pub fn end(&self) -> u32 {
        self.base + self.words
    }
}

/// Device ID readback used to confirm programming mode entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct DeviceId {
    /// Word address of the ID
    pub address: u32,
    /// Expected value (after masking)
    pub value: u32,
    /// Bits compared; revision bits are left out
    #[serde(default = "default_id_mask")]
    pub mask: u32,
}

fn default_id_mask() -> u32 {
    u32::MAX
}

impl DeviceId {
    /// Whether a read value matches
    pub fn matches(&self, found: u32) -> bool {
        found & self.mask == self.value & self.mask
    }
}

/// Timing constants in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Half period of PGC
    pub clock_half_period: u32,
    /// Hold time after MCLR/VPP/VDD changes and after the key
    pub entry_hold: u32,
    /// Delay between a command and its payload, and between commands
    pub command_delay: u32,
    /// Program memory write time
    pub program: u32,
    /// Configuration word write time
    pub program_config: u32,
    /// Row erase time
    pub row_erase: u32,
    /// Bulk erase time
    pub bulk_erase: u32,
    /// Settle time after leaving programming mode
    pub exit: u32,
    /// Deadline for a single line read
    pub read_timeout: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            clock_half_period: 1,
            entry_hold: 250,
            command_delay: 1,
            program: 2500,
            program_config: 5000,
            row_erase: 2500,
            bulk_erase: 5000,
            exit: 100,
            read_timeout: 1000,
        }
    }
}

/// Memory region of a word address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemoryRegion {
    /// Program flash
    Program,
    /// Configuration word space
    Config,
}

impl core::fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Program => f.write_str("program"),
            Self::Config => f.write_str("config"),
        }
    }
}

/// Static descriptor of a PIC variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Vendor name
    pub vendor: String,
    /// Device name
    pub name: String,
    /// Program memory size in words
    pub program_words: u32,
    /// Word width in bits
    pub word_bits: u8,
    /// Bytes per word in hex images (little endian)
    pub bytes_per_word: u8,
    /// Row erase granularity in words, `None` for bulk-erase-only devices
    pub erase_block_words: Option<u32>,
    /// Number of write latches
    pub write_latch_words: u32,
    /// Configuration word space
    pub config: Option<ConfigSpace>,
    /// Device ID readback
    pub device_id: Option<DeviceId>,
    /// Serial framing
    pub encoding: Encoding,
    /// Programming mode entry
    pub entry: EntrySequence,
    /// Command opcodes
    pub commands: Commands,
    /// Timing constants
    pub timing: Timing,
    /// Behavioural quirks
    pub quirks: Quirks,
}

impl DeviceProfile {
    /// Mask covering one word
    pub fn word_mask(&self) -> u32 {
        mask(self.word_bits)
    }

    /// Value of an erased word
    pub fn erased_word(&self) -> u32 {
        self.word_mask()
    }

    /// Region a word address belongs to
    pub fn region_of(&self, address: u32) -> Option<MemoryRegion> {
        if address < self.program_words {
            Some(MemoryRegion::Program)
        } else if self.config.is_some_and(|c| c.contains(address)) {
            Some(MemoryRegion::Config)
        } else {
            None
        }
    }

    /// Whether a word can be written by the host
    ///
    /// The device ID word is read-only.
    pub fn is_writable(&self, address: u32) -> bool {
        self.region_of(address).is_some()
            && !matches!(self.device_id, Some(id) if id.address == address)
    }

    /// Word address ranges of all regions
    pub fn regions(&self) -> Vec<(MemoryRegion, core::ops::Range<u32>)> {
        let mut regions = vec![(MemoryRegion::Program, 0..self.program_words)];
        if let Some(config) = self.config {
            regions.push((MemoryRegion::Config, config.base..config.end()));
        }
        regions
    }

    /// Whether programming mode is entered with a key sequence
    pub fn is_low_voltage(&self) -> bool {
        self.entry.mode == EntryMode::LowVoltage
    }

    /// Program memory size in bytes, as laid out in hex images
    pub fn program_bytes(&self) -> u32 {
        self.program_words * self.bytes_per_word as u32
    }
}

impl core::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.vendor, self.name)
    }
}

pub(crate) fn mask(bits: u8) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// PIC16F1823-like profile used throughout the crate's unit tests
    pub(crate) fn lvp_profile() -> DeviceProfile {
        DeviceProfile {
            vendor: "Microchip".into(),
            name: "PIC16F1823".into(),
            program_words: 2048,
            word_bits: 14,
            bytes_per_word: 2,
            erase_block_words: Some(32),
            write_latch_words: 16,
            config: Some(ConfigSpace {
                base: 0x8000,
                words: 11,
            }),
            device_id: Some(DeviceId {
                address: 0x8006,
                value: 0x2720,
                mask: 0x3FE0,
            }),
            encoding: Encoding {
                bit_order: BitOrder::LsbFirst,
                command_bits: 6,
                payload_bits: 16,
                data_shift: 1,
            },
            entry: EntrySequence {
                mode: EntryMode::LowVoltage,
                key: Some(0x4D43_4850),
                key_bits: 32,
                key_order: BitOrder::LsbFirst,
            },
            commands: Commands {
                load_configuration: Some(0x00),
                load_data: 0x02,
                read_data: 0x04,
                increment_address: 0x06,
                reset_address: Some(0x16),
                load_address: None,
                begin_programming: 0x08,
                bulk_erase: 0x09,
                row_erase: Some(0x11),
            },
            timing: Timing::default(),
            quirks: Quirks::KEY_TRAILING_CLOCK,
        }
    }

    #[test]
    fn test_regions() {
        let p = lvp_profile();
        assert_eq!(p.region_of(0), Some(MemoryRegion::Program));
        assert_eq!(p.region_of(2047), Some(MemoryRegion::Program));
        assert_eq!(p.region_of(2048), None);
        assert_eq!(p.region_of(0x8007), Some(MemoryRegion::Config));
        assert_eq!(p.region_of(0x800B), None);
        assert!(!p.is_writable(0x8006));
        assert!(p.is_writable(0x8007));
    }

    #[test]
    fn test_field_width() {
        let p = lvp_profile();
        assert_eq!(p.encoding.field_bits(), 14);
        assert_eq!(p.encoding.field_mask(), 0x3FFF);
        assert_eq!(p.word_mask(), 0x3FFF);
        assert_eq!(p.program_bytes(), 4096);
    }

    #[test]
    fn test_device_id_mask() {
        let id = lvp_profile().device_id.unwrap();
        assert!(id.matches(0x2724));
        assert!(!id.matches(0x2740));
    }

    #[test]
    fn test_payload_commands() {
        let c = lvp_profile().commands;
        assert!(c.takes_payload(0x02));
        assert!(c.takes_payload(0x00));
        assert!(!c.takes_payload(0x04));
        assert!(!c.takes_payload(0x08));
    }
}
