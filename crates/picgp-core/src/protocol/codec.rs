//! Serial frame encoding and decoding
//!
//! The host and the simulated target share these types so both ends agree
//! on bit order and field placement.

use crate::device::{BitOrder, Encoding};

/// A frame of bits in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bits: u32,
    len: u8,
    order: BitOrder,
}

impl Frame {
    /// Frame of `len` bits of `bits`, sent in `order`
    pub fn new(bits: u32, len: u8, order: BitOrder) -> Self {
        let len = len.min(32);
        Self {
            bits: bits & crate::device::mask(len),
            len,
            order,
        }
    }

    /// Command frame for `opcode`
    pub fn command(encoding: &Encoding, opcode: u8) -> Self {
        Self::new(opcode as u32, encoding.command_bits, encoding.bit_order)
    }

    /// Payload frame carrying `value` in its data field
    pub fn payload(encoding: &Encoding, value: u32) -> Self {
        let field = (value & encoding.field_mask()) << encoding.data_shift;
        Self::new(field, encoding.payload_bits, encoding.bit_order)
    }

    /// Raw frame value
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of bits
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Whether the frame carries no bits
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bits in the order they go on the wire
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        let len = self.len;
        (0..len).map(move |i| {
            let pos = match self.order {
                BitOrder::LsbFirst => i,
                BitOrder::MsbFirst => len - 1 - i,
            };
            (self.bits >> pos) & 1 != 0
        })
    }
}

/// Data field of a received payload frame
pub fn decode_payload(encoding: &Encoding, bits: u32) -> u32 {
    (bits >> encoding.data_shift) & encoding.field_mask()
}

/// Reassembles a frame from bits in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBuilder {
    bits: u32,
    count: u8,
    len: u8,
    order: BitOrder,
}

impl FrameBuilder {
    /// Builder expecting `len` bits in `order`
    pub fn new(len: u8, order: BitOrder) -> Self {
        Self {
            bits: 0,
            count: 0,
            len: len.min(32),
            order,
        }
    }

    /// Append the next bit; returns true once the frame is complete
    pub fn push(&mut self, bit: bool) -> bool {
        if self.is_complete() {
            return true;
        }
        let pos = match self.order {
            BitOrder::LsbFirst => self.count,
            BitOrder::MsbFirst => self.len - 1 - self.count,
        };
        if bit {
            self.bits |= 1 << pos;
        }
        self.count += 1;
        self.is_complete()
    }

    /// Whether all bits have been received
    pub fn is_complete(&self) -> bool {
        self.count >= self.len
    }

    /// Frame value (partial frames have their missing bits clear)
    pub fn value(&self) -> u32 {
        self.bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LSB: Encoding = Encoding {
        bit_order: BitOrder::LsbFirst,
        command_bits: 6,
        payload_bits: 16,
        data_shift: 1,
    };

    const MSB: Encoding = Encoding {
        bit_order: BitOrder::MsbFirst,
        command_bits: 8,
        payload_bits: 24,
        data_shift: 1,
    };

    #[test]
    fn test_command_lsb_first() {
        let bits: Vec<bool> = Frame::command(&LSB, 0x02).iter().collect();
        assert_eq!(bits, vec![false, true, false, false, false, false]);
    }

    #[test]
    fn test_payload_start_stop_bits() {
        let frame = Frame::payload(&LSB, 0x3FFF);
        let bits: Vec<bool> = frame.iter().collect();
        assert_eq!(bits.len(), 16);
        assert!(!bits[0], "start bit");
        assert!(!bits[15], "stop bit");
        assert!(bits[1..15].iter().all(|b| *b));
    }

    #[test]
    fn test_payload_masks_value() {
        let frame = Frame::payload(&LSB, 0xFFFF);
        assert_eq!(decode_payload(&LSB, frame.bits()), 0x3FFF);
    }

    #[test]
    fn test_msb_first_builder() {
        let frame = Frame::payload(&MSB, 0x1234);
        let mut builder = FrameBuilder::new(24, BitOrder::MsbFirst);
        let mut done = false;
        for bit in frame.iter() {
            done = builder.push(bit);
        }
        assert!(done);
        assert_eq!(decode_payload(&MSB, builder.value()), 0x1234);
        let first: Vec<bool> = Frame::command(&MSB, 0x80).iter().take(2).collect();
        assert_eq!(first, vec![true, false]);
    }

    #[test]
    fn test_builder_ignores_extra_bits() {
        let mut builder = FrameBuilder::new(2, BitOrder::LsbFirst);
        builder.push(true);
        assert!(builder.push(false));
        assert!(builder.push(true));
        assert_eq!(builder.value(), 0b01);
    }
}
