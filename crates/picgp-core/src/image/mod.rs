//! Memory images
//!
//! A [`MemoryImage`] is a sparse byte map keyed by byte address, as found in
//! Intel HEX files. PIC tool chains emit two bytes per program word, little
//! endian, so word `n` lives at bytes `2n` and `2n + 1`.

pub mod hex;

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::ops::RangeInclusive;

pub use hex::{parse, parse_file, parse_str, Record, RecordKind, Records};

/// Two different values for the same byte address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapError {
    /// Byte address
    pub address: u32,
    /// Value already present
    pub existing: u8,
    /// Value that was rejected
    pub new: u8,
}

/// Sparse byte image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: BTreeMap<u32, u8>,
}

impl MemoryImage {
    /// Create an empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a byte; an existing different value at the same address is an error
    pub fn insert(&mut self, address: u32, value: u8) -> Result<(), OverlapError> {
        match self.bytes.insert(address, value) {
            Some(existing) if existing != value => {
                self.bytes.insert(address, existing);
                Err(OverlapError {
                    address,
                    existing,
                    new: value,
                })
            }
            _ => Ok(()),
        }
    }

    /// Set a byte, replacing any existing value
    pub fn set(&mut self, address: u32, value: u8) {
        self.bytes.insert(address, value);
    }

    /// Byte at an address
    pub fn get(&self, address: u32) -> Option<u8> {
        self.bytes.get(&address).copied()
    }

    /// Number of bytes present
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image holds no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes in address order
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.bytes.iter().map(|(a, b)| (*a, *b))
    }

    /// Lowest and highest address present
    pub fn span(&self) -> Option<RangeInclusive<u32>> {
        let first = *self.bytes.keys().next()?;
        let last = *self.bytes.keys().next_back()?;
        Some(first..=last)
    }

    /// Maximal runs of consecutive addresses
    pub fn runs(&self) -> Vec<(u32, Vec<u8>)> {
        let mut runs: Vec<(u32, Vec<u8>)> = Vec::new();
        for (&address, &value) in &self.bytes {
            match runs.last_mut() {
                Some((start, data))
                    if (*start as u64) + (data.len() as u64) == address as u64 =>
                {
                    data.push(value)
                }
                _ => runs.push((address, vec![value])),
            }
        }
        runs
    }

    /// Serialise as Intel HEX text
    pub fn to_intel_hex(&self) -> String {
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = hex::write(self, &mut out);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Serialise as Intel HEX into a writer
    pub fn write_intel_hex<W: Write>(&self, writer: W) -> io::Result<()> {
        hex::write(self, writer)
    }
}

impl FromIterator<(u32, u8)> for MemoryImage {
    fn from_iter<I: IntoIterator<Item = (u32, u8)>>(iter: I) -> Self {
        Self {
            bytes: iter.into_iter().collect(),
        }
    }
}

impl Extend<(u32, u8)> for MemoryImage {
    fn extend<I: IntoIterator<Item = (u32, u8)>>(&mut self, iter: I) {
        self.bytes.extend(iter);
    }
}
