use crate::frame::Opcode;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameHead {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: [u8; 4],
    pub payload_len: u64,
}

impl FrameHead {
    /// Decodes a frame head from the start of `buffer`. `Incomplete` carries the number of bytes
    /// needed before decoding can succeed.
    pub fn parse(buffer: &[u8]) -> Result<FrameHead, FrameHeadParseError> {
        let (flags, length_byte) = match buffer {
            [flags, length_byte, ..] => (*flags, *length_byte),
            _ => return Err(FrameHeadParseError::Incomplete(2)),
        };
        if flags & RSV_BITS != 0 {
            return Err(FrameHeadParseError::RsvBit);
        }
        let opcode = Opcode::from_bits(flags & OPCODE_BITS)
            .ok_or(FrameHeadParseError::InvalidOpcode(flags & OPCODE_BITS))?;
        let masked = length_byte & MASK_BIT != 0;
        let length_field = extended_length_bytes(length_byte & LENGTH_BITS);
        let head_len = 2 + length_field + if masked { 4 } else { 0 };
        if buffer.len() < head_len {
            return Err(FrameHeadParseError::Incomplete(head_len));
        }
        let (length, rest) = buffer[2..head_len].split_at(length_field);
        let payload_len = match length_field {
            0 => u64::from(length_byte & LENGTH_BITS),
            _ => length
                .iter()
                .fold(0u64, |len, byte| (len << 8) | u64::from(*byte)),
        };
        let mut mask = [0u8; 4];
        if masked {
            mask.copy_from_slice(rest);
        }
        Ok(FrameHead {
            fin: flags & FIN_BIT != 0,
            opcode,
            mask,
            payload_len,
        })
    }

    /// Encoded size of this head, between 2 and 14 bytes.
    pub fn len_bytes(&self) -> usize {
        let length_field = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + length_field + if self.masked() { 4 } else { 0 }
    }

    pub fn masked(&self) -> bool {
        self.mask != [0; 4]
    }

    /// Writes the head to the start of `buffer`, which must hold at least
    /// [`len_bytes`](Self::len_bytes) bytes, and returns the number written.
    pub fn encode(&self, buffer: &mut [u8]) -> usize {
        let mask_bit = if self.masked() { MASK_BIT } else { 0 };
        buffer[0] = (if self.fin { FIN_BIT } else { 0 }) | self.opcode.bits();
        let mut written = 2;
        match self.payload_len {
            len @ 0..=125 => buffer[1] = mask_bit | len as u8,
            len @ 126..=0xFFFF => {
                buffer[1] = mask_bit | 126;
                buffer[2..4].copy_from_slice(&(len as u16).to_be_bytes());
                written = 4;
            }
            len => {
                buffer[1] = mask_bit | 127;
                buffer[2..10].copy_from_slice(&len.to_be_bytes());
                written = 10;
            }
        }
        if self.masked() {
            buffer[written..written + 4].copy_from_slice(&self.mask);
            written += 4;
        }
        written
    }
}

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LENGTH_BITS: u8 = 0x7F;

fn extended_length_bytes(length: u8) -> usize {
    match length {
        126 => 2,
        127 => 8,
        _ => 0,
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameHeadParseError {
    #[error("incomplete, need at least {0} bytes")]
    Incomplete(usize),
    #[error("one or more RSV bit is set")]
    RsvBit,
    #[error("invalid opcode {0:#x}")]
    InvalidOpcode(u8),
}
