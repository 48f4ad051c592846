mod engine;
mod head;
mod protocol;
mod utf8_validation;

pub use engine::*;
pub use head::*;
pub use protocol::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
    pub fn bits(&self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// XORs `buffer` with the masking key. `offset` is the position of `buffer[0]` within the
/// frame payload, so a payload may be processed in pieces.
pub fn mask(key: [u8; 4], offset: usize, buffer: &mut [u8]) {
    if key == [0; 4] {
        return;
    }
    for (i, byte) in buffer.iter_mut().enumerate() {
        *byte ^= key[(offset + i) % 4];
    }
}
