//! Mapping a byte image onto device words

use std::collections::BTreeMap;

use crate::device::{DeviceProfile, MemoryRegion};
use crate::error::{Error, Result};
use crate::image::MemoryImage;

/// Consecutive words within one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordRun {
    /// Region the run lies in
    pub region: MemoryRegion,
    /// First word address
    pub start: u32,
    /// Word values, already masked to the word width
    pub words: Vec<u32>,
}

impl WordRun {
    /// One past the last word address
    pub fn end(&self) -> u32 {
        self.start + self.words.len() as u32
    }

    /// `(address, word)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.words
            .iter()
            .enumerate()
            .map(|(i, w)| (self.start + i as u32, *w))
    }
}

/// How memory is cleared before writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErasePlan {
    /// Nothing to erase
    None,
    /// Whole-device erase
    Bulk {
        /// Configuration words are erased too
        include_config: bool,
    },
    /// Row erases at these word addresses
    Rows(Vec<u32>),
}

/// Words to program, grouped into runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WritePlan {
    runs: Vec<WordRun>,
}

impl WritePlan {
    /// Build a plan from a byte image
    ///
    /// Bytes are grouped `bytes_per_word` at a time, little endian. Bytes an
    /// image leaves out keep their erased value. Fails with
    /// `AddressOutOfBounds` (carrying the byte address) for data outside the
    /// device memory map. The read-only device ID word is dropped.
    pub fn from_image(profile: &DeviceProfile, image: &MemoryImage) -> Result<Self> {
        let bytes_per_word = profile.bytes_per_word as u32;
        let erased = profile.erased_word();
        let mut words: BTreeMap<u32, u32> = BTreeMap::new();

        for (address, byte) in image.iter() {
            let word_address = address / bytes_per_word;
            if profile.region_of(word_address).is_none() {
                return Err(Error::AddressOutOfBounds { address });
            }
            let shift = 8 * (address % bytes_per_word);
            let word = words.entry(word_address).or_insert(erased);
            *word = (*word & !(0xFF << shift)) | ((byte as u32) << shift);
        }

        let mut runs: Vec<WordRun> = Vec::new();
        for (address, word) in words {
            if !profile.is_writable(address) {
                log::warn!("skipping read-only word 0x{:04X} in image", address);
                continue;
            }
            let word = word & profile.word_mask();
            // region_of() was checked above
            let region = profile.region_of(address).unwrap_or(MemoryRegion::Program);
            match runs.last_mut() {
                Some(run) if run.region == region && run.end() == address => run.words.push(word),
                _ => runs.push(WordRun {
                    region,
                    start: address,
                    words: vec![word],
                }),
            }
        }

        Ok(Self { runs })
    }

    /// Runs in address order
    pub fn runs(&self) -> &[WordRun] {
        &self.runs
    }

    /// Total number of words
    pub fn word_count(&self) -> usize {
        self.runs.iter().map(|r| r.words.len()).sum()
    }

    /// Whether there is nothing to write
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Whether any configuration words are present
    pub fn has_config(&self) -> bool {
        self.runs.iter().any(|r| r.region == MemoryRegion::Config)
    }

    /// First and one-past-last program memory word address
    pub fn program_span(&self) -> Option<(u32, u32)> {
        let mut program = self
            .runs
            .iter()
            .filter(|r| r.region == MemoryRegion::Program);
        let first = program.next()?;
        let last = program.last().unwrap_or(first);
        Some((first.start, last.end()))
    }

    /// Erase needed before writing this plan
    ///
    /// Rows covering the program span, rounded out to row boundaries, on
    /// devices with row erase. Configuration words, or devices without row
    /// erase, need a bulk erase.
    pub fn erase_plan(&self, profile: &DeviceProfile) -> ErasePlan {
        if self.is_empty() {
            return ErasePlan::None;
        }
        let row = match profile.erase_block_words {
            Some(row) if !self.has_config() => row,
            _ => {
                return ErasePlan::Bulk {
                    include_config: self.has_config(),
                }
            }
        };
        let Some((start, end)) = self.program_span() else {
            return ErasePlan::None;
        };
        let first = start / row * row;
        let last = end.div_ceil(row) * row;
        ErasePlan::Rows((first..last).step_by(row as usize).collect())
    }
}

/// Split a run into write-latch sized chunks
///
/// Program memory chunks never cross a latch boundary; configuration words
/// are written one at a time.
pub(crate) fn chunks<'a>(
    run: &'a WordRun,
    profile: &DeviceProfile,
) -> impl Iterator<Item = (u32, &'a [u32])> + 'a {
    let latch = match run.region {
        MemoryRegion::Program => profile.write_latch_words.max(1),
        MemoryRegion::Config => 1,
    };
    let mut address = run.start;
    let mut rest = &run.words[..];
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let room = (latch - address % latch) as usize;
        let n = room.min(rest.len());
        let (chunk, tail) = rest.split_at(n);
        let start = address;
        address += n as u32;
        rest = tail;
        Some((start, chunk))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::lvp_profile;

    fn image(pairs: &[(u32, u8)]) -> MemoryImage {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_words_little_endian_and_masked() {
        let p = lvp_profile();
        let plan = WritePlan::from_image(&p, &image(&[(0, 0x34), (1, 0xF2), (4, 0xAA)])).unwrap();
        assert_eq!(plan.runs().len(), 2);
        assert_eq!(plan.runs()[0].words, vec![0x3234]);
        // Missing high byte keeps the erased value
        assert_eq!(plan.runs()[1].start, 2);
        assert_eq!(plan.runs()[1].words, vec![0x3FAA]);
    }

    #[test]
    fn test_out_of_bounds_byte_address() {
        let p = lvp_profile();
        let err = WritePlan::from_image(&p, &image(&[(0x1000, 0)])).unwrap_err();
        assert_eq!(err, Error::AddressOutOfBounds { address: 0x1000 });
    }

    #[test]
    fn test_config_words_and_device_id() {
        let p = lvp_profile();
        // 0x8006 is the device ID, 0x8007 the first config word
        let img = image(&[(0x1000C, 0x20), (0x1000D, 0x27), (0x1000E, 0xE4), (0x1000F, 0x3F)]);
        let plan = WritePlan::from_image(&p, &img).unwrap();
        assert_eq!(plan.word_count(), 1);
        assert_eq!(plan.runs()[0].region, MemoryRegion::Config);
        assert_eq!(plan.runs()[0].start, 0x8007);
        assert!(plan.has_config());
        assert_eq!(plan.erase_plan(&p), ErasePlan::Bulk { include_config: true });
    }

    #[test]
    fn test_row_erase_covers_span() {
        let p = lvp_profile();
        // Words 30..=33 and 70
        let mut pairs = Vec::new();
        for w in [30u32, 31, 32, 33, 70] {
            pairs.push((w * 2, 0));
            pairs.push((w * 2 + 1, 0));
        }
        let plan = WritePlan::from_image(&p, &image(&pairs)).unwrap();
        assert_eq!(plan.program_span(), Some((30, 71)));
        assert_eq!(plan.erase_plan(&p), ErasePlan::Rows(vec![0, 32, 64]));
    }

    #[test]
    fn test_bulk_only_device() {
        let mut p = lvp_profile();
        p.erase_block_words = None;
        p.commands.row_erase = None;
        let plan = WritePlan::from_image(&p, &image(&[(0, 1)])).unwrap();
        assert_eq!(plan.erase_plan(&p), ErasePlan::Bulk { include_config: false });
        assert_eq!(WritePlan::default().erase_plan(&p), ErasePlan::None);
    }

    #[test]
    fn test_chunks_respect_latches() {
        let p = lvp_profile();
        let run = WordRun {
            region: MemoryRegion::Program,
            start: 14,
            words: vec![0; 20],
        };
        let sizes: Vec<(u32, usize)> = chunks(&run, &p).map(|(a, c)| (a, c.len())).collect();
        assert_eq!(sizes, vec![(14, 2), (16, 16), (32, 2)]);

        let config = WordRun {
            region: MemoryRegion::Config,
            start: 0x8007,
            words: vec![0; 2],
        };
        assert_eq!(chunks(&config, &p).count(), 2);
    }
}
