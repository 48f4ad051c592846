//! The action-queue contract between a session and a frame engine.
//!
//! A frame engine understands WebSocket framing but never touches the network. The session asks
//! it what to do next with [`FrameEngine::get_action`], performs that step (network read, network
//! write, handing decoded payload to a caller) and reports back with
//! [`FrameEngine::complete_action`]. All memory the engine reads from or writes to is described
//! by [`NativeRegion`] values pointing into memory owned by the session.

use crate::frame::FrameHeadParseError;
use std::ops::Range;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActionQueue {
    Send,
    Receive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    NoAction,
    SendToNetwork,
    IndicateSendComplete,
    ReceiveFromNetwork,
    IndicateReceiveComplete,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum BufferType {
    Utf8Message,
    Utf8Fragment,
    BinaryMessage,
    BinaryFragment,
    Close,
    Ping,
    Pong,
    UnsolicitedPong,
}

impl BufferType {
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            BufferType::Utf8Message
                | BufferType::Utf8Fragment
                | BufferType::BinaryMessage
                | BufferType::BinaryFragment
        )
    }
    pub fn is_control(&self) -> bool {
        !self.is_data()
    }
}

/// A region of session owned memory, addressed without raw pointers.
///
/// `Internal` ranges address the session's fixed internal region: the receive area occupies
/// `0..receive_buffer_size`, the send area follows it. `PinnedSend` ranges address the caller
/// payload pinned for the current send. Anything else an engine could name is `Foreign`, which a
/// session always rejects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NativeRegion {
    Internal(Range<usize>),
    PinnedSend(Range<usize>),
    Foreign,
}

impl NativeRegion {
    pub fn len(&self) -> usize {
        match self {
            NativeRegion::Internal(range) | NativeRegion::PinnedSend(range) => range.len(),
            NativeRegion::Foreign => 0,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The memory an engine may touch during one call.
///
/// `receive` is `None` while the receive area is checked out for a network read.
pub struct NativeMemory<'a> {
    pub receive: Option<&'a mut [u8]>,
    pub send: &'a mut [u8],
    pub pinned: Option<&'a mut [u8]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EngineProperties {
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ActionContext(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineAction {
    pub action: Action,
    pub buffer_type: Option<BufferType>,
    pub buffers: Vec<NativeRegion>,
    pub context: ActionContext,
}

impl EngineAction {
    pub fn no_action() -> Self {
        Self {
            action: Action::NoAction,
            buffer_type: None,
            buffers: Vec::new(),
            context: ActionContext(0),
        }
    }
}

pub enum SendPayload<'a> {
    /// Payload pinned by the session, referenced by region.
    Pinned(NativeRegion),
    /// Small control payload (close status and reason, ping data) copied by the engine.
    Control(&'a [u8]),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("handshake has not completed")]
    HandshakeIncomplete,
    #[error("buffer configuration rejected: {0}")]
    InvalidProperties(&'static str),
    #[error("engine has been aborted")]
    Aborted,
    #[error("a receive is already queued")]
    ReceiveAlreadyQueued,
    #[error("close frame already sent")]
    CloseAlreadySent,
    #[error("close frame already received")]
    CloseAlreadyReceived,
    #[error("invalid send payload for {0}")]
    InvalidSendPayload(BufferType),
    #[error("region {0:?} is not available to the engine")]
    RegionUnavailable(NativeRegion),
    #[error("unknown action context {0:?}")]
    UnknownContext(ActionContext),
    #[error("frame head: {0}")]
    FrameHead(#[from] FrameHeadParseError),
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("invalid utf-8 in text message")]
    InvalidUtf8,
}

/// An engine that classifies WebSocket work without performing any I/O.
///
/// Engines are not assumed to be reentrant: a session serializes every call through a single
/// lock.
pub trait FrameEngine: Send + 'static {
    fn begin_handshake(
        &mut self,
        role: Role,
        properties: &EngineProperties,
    ) -> Result<(), EngineError>;

    fn end_handshake(&mut self) -> Result<(), EngineError>;

    /// Queues an outgoing frame of `buffer_type`.
    fn send(&mut self, buffer_type: BufferType, payload: SendPayload<'_>)
        -> Result<(), EngineError>;

    /// Queues one receive. Exactly one `IndicateReceiveComplete` answers it.
    fn receive(&mut self) -> Result<(), EngineError>;

    fn get_action(
        &mut self,
        queue: ActionQueue,
        memory: &mut NativeMemory<'_>,
    ) -> Result<EngineAction, EngineError>;

    fn complete_action(
        &mut self,
        context: ActionContext,
        bytes_transferred: usize,
        memory: &mut NativeMemory<'_>,
    ) -> Result<(), EngineError>;

    /// Stops all queued work. Afterwards both queues must be drained by the caller.
    fn abort(&mut self);
}
