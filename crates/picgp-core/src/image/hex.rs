//! Intel HEX reader and writer
//!
//! Each record is a line `:LLAAAATT<data>CC` of hex digit pairs: byte count,
//! 16-bit offset, record type, data and a two's complement checksum over
//! everything before it. Addresses are formed from the most recent extended
//! address record plus the record offset, wrapping within the 64 KiB
//! window.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use super::MemoryImage;
use crate::error::{Error, Result};

/// Maximum data bytes per written record
const WRITE_RECORD_LEN: usize = 16;

/// Intel HEX record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// 00: data
    Data,
    /// 01: end of file
    EndOfFile,
    /// 02: extended segment address (base = value * 16)
    ExtendedSegmentAddress,
    /// 03: start segment address (CS:IP), ignored
    StartSegmentAddress,
    /// 04: extended linear address (upper 16 address bits)
    ExtendedLinearAddress,
    /// 05: start linear address (EIP), ignored
    StartLinearAddress,
}

impl RecordKind {
    /// Record kind for a type byte
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x02 => Self::ExtendedSegmentAddress,
            0x03 => Self::StartSegmentAddress,
            0x04 => Self::ExtendedLinearAddress,
            0x05 => Self::StartLinearAddress,
            _ => return None,
        })
    }

    /// Type byte
    pub fn code(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::EndOfFile => 0x01,
            Self::ExtendedSegmentAddress => 0x02,
            Self::StartSegmentAddress => 0x03,
            Self::ExtendedLinearAddress => 0x04,
            Self::StartLinearAddress => 0x05,
        }
    }

    /// Required data length, for record types that fix it
    fn fixed_len(self) -> Option<usize> {
        match self {
            Self::Data => None,
            Self::EndOfFile => Some(0),
            Self::ExtendedSegmentAddress | Self::ExtendedLinearAddress => Some(2),
            Self::StartSegmentAddress | Self::StartLinearAddress => Some(4),
        }
    }
}

/// One parsed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based source line
    pub line: usize,
    /// Record type
    pub kind: RecordKind,
    /// 16-bit address field
    pub offset: u16,
    /// Data bytes
    pub data: Vec<u8>,
}

impl Record {
    /// Data interpreted as a big-endian 16-bit value (address records)
    fn value16(&self) -> u32 {
        ((self.data[0] as u32) << 8) | self.data[1] as u32
    }
}

fn corrupt(line: usize, reason: impl Into<String>) -> Error {
    Error::CorruptImage {
        line,
        reason: reason.into(),
    }
}

fn decode_hex(text: &str, line: usize) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(corrupt(line, "odd number of hex digits"));
    }
    let nibble = |c: u8| char::from(c).to_digit(16);
    text.as_bytes()
        .chunks(2)
        .map(|pair| match (nibble(pair[0]), nibble(pair[1])) {
            (Some(high), Some(low)) => Ok((high << 4 | low) as u8),
            _ => Err(corrupt(
                line,
                format!("invalid hex digits '{}'", String::from_utf8_lossy(pair)),
            )),
        })
        .collect()
}

/// Parse one record line (without its line terminator)
pub fn parse_record(text: &str, line: usize) -> Result<Record> {
    let text = text.trim();
    let body = text
        .strip_prefix(':')
        .ok_or_else(|| corrupt(line, "missing ':' start code"))?;
    let bytes = decode_hex(body, line)?;
    if bytes.len() < 5 {
        return Err(corrupt(line, "record too short"));
    }

    let count = bytes[0] as usize;
    if bytes.len() != count + 5 {
        return Err(corrupt(
            line,
            format!("byte count {} does not match record length {}", count, bytes.len() - 5),
        ));
    }
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        let stored = bytes[bytes.len() - 1];
        let computed = stored.wrapping_sub(sum);
        return Err(corrupt(
            line,
            format!("checksum mismatch (stored 0x{:02X}, computed 0x{:02X})", stored, computed),
        ));
    }

    let record_type = bytes[3];
    let kind = RecordKind::from_code(record_type).ok_or(Error::UnsupportedFormat {
        line,
        record_type,
    })?;
    if let Some(len) = kind.fixed_len() {
        if count != len {
            return Err(corrupt(
                line,
                format!("record type 0x{:02X} needs {} data bytes, has {}", record_type, len, count),
            ));
        }
    }

    Ok(Record {
        line,
        kind,
        offset: u16::from_be_bytes([bytes[1], bytes[2]]),
        data: bytes[4..4 + count].to_vec(),
    })
}

/// Lazy record iterator over a reader
///
/// Blank lines are skipped. The iterator stops after the first error.
pub struct Records<R> {
    reader: R,
    line: usize,
    buf: String,
    failed: bool,
}

impl<R: BufRead> Records<R> {
    /// Iterate over the records in `reader`
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
            failed: false,
        }
    }

    /// Number of lines consumed so far
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line += 1;
                    if self.buf.trim().is_empty() {
                        continue;
                    }
                    let record = parse_record(&self.buf, self.line);
                    self.failed = record.is_err();
                    return Some(record);
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(if e.kind() == io::ErrorKind::InvalidData {
                        corrupt(self.line + 1, "not valid text")
                    } else {
                        e.into()
                    }));
                }
            }
        }
    }
}

/// Parse a complete Intel HEX stream
///
/// Either the whole stream is valid and an image is returned, or nothing
/// is.
pub fn parse<R: BufRead>(reader: R) -> Result<MemoryImage> {
    let mut image = MemoryImage::new();
    let mut records = Records::new(reader);
    let mut base: u32 = 0;
    let mut data_records = 0usize;

    loop {
        let record = match records.next() {
            Some(record) => record?,
            None => {
                return Err(corrupt(records.line() + 1, "missing end-of-file record"));
            }
        };

        match record.kind {
            RecordKind::Data => {
                for (i, byte) in record.data.iter().enumerate() {
                    let address = base.wrapping_add((record.offset as u32 + i as u32) & 0xFFFF);
                    image.insert(address, *byte).map_err(|e| {
                        corrupt(
                            record.line,
                            format!(
                                "overlapping data at 0x{:08X} (0x{:02X} vs 0x{:02X})",
                                e.address, e.existing, e.new
                            ),
                        )
                    })?;
                }
                data_records += 1;
            }
            RecordKind::ExtendedSegmentAddress => base = record.value16() << 4,
            RecordKind::ExtendedLinearAddress => base = record.value16() << 16,
            RecordKind::StartSegmentAddress | RecordKind::StartLinearAddress => {
                log::debug!("ignoring start address record at line {}", record.line);
            }
            RecordKind::EndOfFile => break,
        }
    }

    if records.next().is_some() {
        log::warn!(
            "ignoring data after end-of-file record (line {})",
            records.line()
        );
    }

    log::debug!(
        "parsed {} data records, {} bytes",
        data_records,
        image.len()
    );
    Ok(image)
}

/// Parse Intel HEX text
pub fn parse_str(text: &str) -> Result<MemoryImage> {
    parse(text.as_bytes())
}

/// Parse an Intel HEX file
pub fn parse_file(path: impl AsRef<Path>) -> Result<MemoryImage> {
    let file = File::open(path.as_ref())?;
    parse(BufReader::new(file))
}

fn write_record<W: Write>(w: &mut W, kind: RecordKind, offset: u16, data: &[u8]) -> io::Result<()> {
    let [hi, lo] = offset.to_be_bytes();
    let mut sum = (data.len() as u8)
        .wrapping_add(hi)
        .wrapping_add(lo)
        .wrapping_add(kind.code());
    write!(w, ":{:02X}{:04X}{:02X}", data.len(), offset, kind.code())?;
    for byte in data {
        sum = sum.wrapping_add(*byte);
        write!(w, "{:02X}", byte)?;
    }
    writeln!(w, "{:02X}", 0u8.wrapping_sub(sum))
}

/// Write an image as Intel HEX
///
/// Data records carry at most 16 bytes and never cross a 64 KiB boundary;
/// extended linear address records are emitted whenever the upper 16
/// address bits change.
pub fn write<W: Write>(image: &MemoryImage, mut w: W) -> io::Result<()> {
    let mut upper: u16 = 0;
    for (start, bytes) in image.runs() {
        let mut address = start as u64;
        let mut rest = &bytes[..];
        while !rest.is_empty() {
            let hi = (address >> 16) as u16;
            if hi != upper {
                write_record(&mut w, RecordKind::ExtendedLinearAddress, 0, &hi.to_be_bytes())?;
                upper = hi;
            }
            let room = 0x1_0000 - (address & 0xFFFF);
            let n = rest.len().min(WRITE_RECORD_LEN).min(room as usize);
            write_record(&mut w, RecordKind::Data, address as u16, &rest[..n])?;
            address += n as u64;
            rest = &rest[n..];
        }
    }
    write_record(&mut w, RecordKind::EndOfFile, 0, &[])
}
