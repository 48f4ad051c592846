use crate::frame::BufferType;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum WsMessageType {
    Text,
    Binary,
    Close,
}

impl WsMessageType {
    /// Buffer type handed to the frame engine when sending a data message or fragment.
    pub fn buffer_type(&self, end_of_message: bool) -> Option<BufferType> {
        match (self, end_of_message) {
            (WsMessageType::Text, true) => Some(BufferType::Utf8Message),
            (WsMessageType::Text, false) => Some(BufferType::Utf8Fragment),
            (WsMessageType::Binary, true) => Some(BufferType::BinaryMessage),
            (WsMessageType::Binary, false) => Some(BufferType::BinaryFragment),
            (WsMessageType::Close, _) => None,
        }
    }
    /// Message type and end-of-message flag of a decoded data or close buffer. Ping and pong
    /// buffers carry no message.
    pub fn from_buffer_type(buffer_type: BufferType) -> Option<(Self, bool)> {
        match buffer_type {
            BufferType::Utf8Message => Some((WsMessageType::Text, true)),
            BufferType::Utf8Fragment => Some((WsMessageType::Text, false)),
            BufferType::BinaryMessage => Some((WsMessageType::Binary, true)),
            BufferType::BinaryFragment => Some((WsMessageType::Binary, false)),
            BufferType::Close => Some((WsMessageType::Close, true)),
            BufferType::Ping | BufferType::Pong | BufferType::UnsolicitedPong => None,
        }
    }
}

/// Outcome of one `receive` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WsReceiveResult {
    pub count: usize,
    pub message_type: WsMessageType,
    pub end_of_message: bool,
}
