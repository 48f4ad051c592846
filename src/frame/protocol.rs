use crate::frame::utf8_validation::process_utf8;
use crate::frame::{
    mask, Action, ActionContext, ActionQueue, BufferType, EngineAction, EngineError,
    EngineProperties, FrameEngine, FrameHead, FrameHeadParseError, NativeMemory, NativeRegion,
    Opcode, Role, SendPayload,
};
use rand::{thread_rng, RngCore};
use std::collections::VecDeque;
use std::ops::Range;
use utf8::Incomplete;

// Slots inside the send area. Control frames originating from the two queues never share memory.
const DATA_HEAD_SLOT: Range<usize> = 0..14;
const SEND_CONTROL_SLOT: Range<usize> = 16..160;
const RECEIVE_CONTROL_SLOT: Range<usize> = 160..304;

pub const MIN_SEND_BUFFER_SIZE: usize = 304;
pub const MIN_RECEIVE_BUFFER_SIZE: usize = 256;
const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug)]
enum Stage {
    Queued,
    Transmitting,
    Transmitted,
}

#[derive(Debug)]
enum OutgoingPayload {
    Pinned(Range<usize>),
    Control(Vec<u8>),
}

#[derive(Debug)]
struct OutgoingFrame {
    id: u64,
    origin: ActionQueue,
    buffer_type: BufferType,
    opcode: Opcode,
    fin: bool,
    payload: OutgoingPayload,
    stage: Stage,
}

#[derive(Debug)]
struct InboundFrame {
    head: FrameHead,
    remaining: u64,
}

struct InboundMessage {
    text: bool,
    utf8: Incomplete,
}

#[derive(Default)]
struct Inbound {
    filled: usize,
    consumed: usize,
    frame: Option<InboundFrame>,
    message: Option<InboundMessage>,
}

#[derive(Debug)]
enum Pending {
    Transmit(u64),
    IndicateSend(u64),
    Fill,
    Indicate {
        len: usize,
        buffer_type: BufferType,
        ping_payload: Option<Vec<u8>>,
    },
}

/// RFC 6455 framing behind the action-queue contract.
pub struct ProtocolEngine {
    role: Role,
    layout: Option<EngineProperties>,
    handshake_complete: bool,
    aborted: bool,
    next_id: u64,
    outgoing: VecDeque<OutgoingFrame>,
    sending_message: Option<Opcode>,
    close_sent: bool,
    close_received: bool,
    receive_queued: bool,
    inbound: Inbound,
    pending: Vec<(ActionContext, Pending)>,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEngine {
    pub fn new() -> Self {
        Self {
            role: Role::Server,
            layout: None,
            handshake_complete: false,
            aborted: false,
            next_id: 1,
            outgoing: VecDeque::new(),
            sending_message: None,
            close_sent: false,
            close_received: false,
            receive_queued: false,
            inbound: Inbound::default(),
            pending: Vec::new(),
        }
    }

    fn ready(&self) -> Result<EngineProperties, EngineError> {
        if self.aborted {
            return Err(EngineError::Aborted);
        }
        match (self.handshake_complete, self.layout) {
            (true, Some(layout)) => Ok(layout),
            _ => Err(EngineError::HandshakeIncomplete),
        }
    }

    fn next_context(&mut self, pending: Pending) -> ActionContext {
        let context = ActionContext(self.next_id);
        self.next_id += 1;
        self.pending.push((context, pending));
        context
    }

    fn gen_mask(&self) -> [u8; 4] {
        match self.role {
            Role::Client => (thread_rng().next_u32() | 1).to_ne_bytes(),
            Role::Server => [0u8, 0u8, 0u8, 0u8],
        }
    }

    fn data_opcode(&mut self, buffer_type: BufferType) -> Result<(Opcode, bool), EngineError> {
        let (kind, fin) = match buffer_type {
            BufferType::Utf8Message => (Opcode::Text, true),
            BufferType::Utf8Fragment => (Opcode::Text, false),
            BufferType::BinaryMessage => (Opcode::Binary, true),
            BufferType::BinaryFragment => (Opcode::Binary, false),
            other => return Err(EngineError::InvalidSendPayload(other)),
        };
        let opcode = match self.sending_message {
            Some(current) if current != kind => {
                return Err(EngineError::Protocol("message type changed between fragments"))
            }
            Some(_) => Opcode::Continuation,
            None => kind,
        };
        self.sending_message = match fin {
            true => None,
            false => Some(kind),
        };
        Ok((opcode, fin))
    }

    fn transmit(
        &mut self,
        index: usize,
        layout: EngineProperties,
        memory: &mut NativeMemory<'_>,
    ) -> Result<EngineAction, EngineError> {
        let frame_mask = self.gen_mask();
        let frame = &mut self.outgoing[index];
        let send_base = layout.receive_buffer_size;
        let buffers = match &frame.payload {
            OutgoingPayload::Pinned(range) => {
                let head = FrameHead {
                    fin: frame.fin,
                    opcode: frame.opcode,
                    mask: frame_mask,
                    payload_len: range.len() as u64,
                };
                let head_len = head.encode(&mut memory.send[DATA_HEAD_SLOT]);
                let mut buffers = vec![NativeRegion::Internal(
                    send_base + DATA_HEAD_SLOT.start..send_base + DATA_HEAD_SLOT.start + head_len,
                )];
                if !range.is_empty() {
                    let pinned = memory
                        .pinned
                        .as_deref_mut()
                        .and_then(|pinned| pinned.get_mut(range.clone()))
                        .ok_or_else(|| {
                            EngineError::RegionUnavailable(NativeRegion::PinnedSend(range.clone()))
                        })?;
                    mask(frame_mask, 0, pinned);
                    buffers.push(NativeRegion::PinnedSend(range.clone()));
                }
                buffers
            }
            OutgoingPayload::Control(payload) => {
                let slot = match frame.origin {
                    ActionQueue::Send => SEND_CONTROL_SLOT,
                    ActionQueue::Receive => RECEIVE_CONTROL_SLOT,
                };
                let head = FrameHead {
                    fin: true,
                    opcode: frame.opcode,
                    mask: frame_mask,
                    payload_len: payload.len() as u64,
                };
                let target = &mut memory.send[slot.clone()];
                let head_len = head.encode(target);
                let payload_slot = &mut target[head_len..head_len + payload.len()];
                payload_slot.copy_from_slice(payload);
                mask(frame_mask, 0, payload_slot);
                let start = send_base + slot.start;
                vec![NativeRegion::Internal(start..start + head_len + payload.len())]
            }
        };
        frame.stage = Stage::Transmitting;
        let id = frame.id;
        let buffer_type = frame.buffer_type;
        Ok(EngineAction {
            action: Action::SendToNetwork,
            buffer_type: Some(buffer_type),
            buffers,
            context: self.next_context(Pending::Transmit(id)),
        })
    }

    fn next_outgoing_action(
        &mut self,
        queue: ActionQueue,
        layout: EngineProperties,
        memory: &mut NativeMemory<'_>,
    ) -> Result<Option<EngineAction>, EngineError> {
        let index = match self.outgoing.iter().position(|f| f.origin == queue) {
            Some(index) => index,
            None => return Ok(None),
        };
        match self.outgoing[index].stage {
            Stage::Queued => self.transmit(index, layout, memory).map(Some),
            Stage::Transmitting => Ok(None),
            Stage::Transmitted => {
                let frame = &self.outgoing[index];
                let (id, buffer_type) = (frame.id, frame.buffer_type);
                Ok(Some(EngineAction {
                    action: Action::IndicateSendComplete,
                    buffer_type: Some(buffer_type),
                    buffers: Vec::new(),
                    context: self.next_context(Pending::IndicateSend(id)),
                }))
            }
        }
    }

    fn fill_action(&mut self, area: &mut [u8]) -> Result<EngineAction, EngineError> {
        let inbound = &mut self.inbound;
        if inbound.consumed > 0 {
            area.copy_within(inbound.consumed..inbound.filled, 0);
            inbound.filled -= inbound.consumed;
            inbound.consumed = 0;
        }
        if inbound.filled == area.len() {
            return Err(EngineError::Protocol("frame head does not fit the receive buffer"));
        }
        let region = NativeRegion::Internal(inbound.filled..area.len());
        Ok(EngineAction {
            action: Action::ReceiveFromNetwork,
            buffer_type: None,
            buffers: vec![region],
            context: self.next_context(Pending::Fill),
        })
    }

    fn accept_head(&mut self, head: FrameHead) -> Result<(), EngineError> {
        match (self.role, head.masked()) {
            (Role::Server, false) => return Err(EngineError::Protocol("unmasked client frame")),
            (Role::Client, true) => return Err(EngineError::Protocol("masked server frame")),
            _ => {}
        }
        match head.opcode {
            op if op.is_control() => {
                if !head.fin {
                    return Err(EngineError::Protocol("fragmented control frame"));
                }
                if head.payload_len > MAX_CONTROL_PAYLOAD as u64 {
                    return Err(EngineError::Protocol("control frame payload too long"));
                }
            }
            Opcode::Continuation => {
                if self.inbound.message.is_none() {
                    return Err(EngineError::Protocol("continuation without message"));
                }
            }
            op => {
                if self.inbound.message.is_some() {
                    return Err(EngineError::Protocol("new message before previous ended"));
                }
                self.inbound.message = Some(InboundMessage {
                    text: op == Opcode::Text,
                    utf8: Incomplete::empty(),
                });
            }
        }
        self.inbound.frame = Some(InboundFrame {
            head,
            remaining: head.payload_len,
        });
        Ok(())
    }

    fn next_receive_action(
        &mut self,
        memory: &mut NativeMemory<'_>,
    ) -> Result<EngineAction, EngineError> {
        let area = match memory.receive.as_deref_mut() {
            Some(area) => area,
            None => return Err(EngineError::RegionUnavailable(NativeRegion::Internal(0..0))),
        };
        if self.inbound.frame.is_none() {
            let parsed = FrameHead::parse(&area[self.inbound.consumed..self.inbound.filled]);
            match parsed {
                Ok(head) => {
                    self.inbound.consumed += head.len_bytes();
                    self.accept_head(head)?;
                }
                Err(FrameHeadParseError::Incomplete(_)) => return self.fill_action(area),
                Err(err) => return Err(err.into()),
            }
        }
        let (head, remaining) = match &self.inbound.frame {
            Some(frame) => (frame.head, frame.remaining),
            None => return self.fill_action(area),
        };
        let start = self.inbound.consumed;
        let available = self.inbound.filled - start;

        if head.opcode.is_control() {
            let len = head.payload_len as usize;
            if available < len {
                return self.fill_action(area);
            }
            let payload = &mut area[start..start + len];
            mask(head.mask, 0, payload);
            let buffer_type = match head.opcode {
                Opcode::Close => {
                    if len == 1 {
                        return Err(EngineError::Protocol("close payload of one byte"));
                    }
                    if len > 2 && std::str::from_utf8(&payload[2..]).is_err() {
                        return Err(EngineError::InvalidUtf8);
                    }
                    BufferType::Close
                }
                Opcode::Ping => BufferType::Ping,
                _ => BufferType::Pong,
            };
            let ping_payload = match buffer_type {
                BufferType::Ping => Some(payload.to_vec()),
                _ => None,
            };
            return Ok(EngineAction {
                action: Action::IndicateReceiveComplete,
                buffer_type: Some(buffer_type),
                buffers: vec![NativeRegion::Internal(start..start + len)],
                context: self.next_context(Pending::Indicate {
                    len,
                    buffer_type,
                    ping_payload,
                }),
            });
        }

        let take = (available as u64).min(remaining) as usize;
        if take == 0 && remaining > 0 {
            return self.fill_action(area);
        }
        let payload = &mut area[start..start + take];
        mask(head.mask, (head.payload_len - remaining) as usize, payload);
        let last = take as u64 == remaining && head.fin;
        let text = match &mut self.inbound.message {
            Some(message) => {
                if message.text {
                    if !process_utf8(&mut message.utf8, payload) {
                        return Err(EngineError::InvalidUtf8);
                    }
                    if last && !message.utf8.is_empty() {
                        return Err(EngineError::InvalidUtf8);
                    }
                }
                message.text
            }
            None => return Err(EngineError::Protocol("data frame without message")),
        };
        let buffer_type = match (text, last) {
            (true, true) => BufferType::Utf8Message,
            (true, false) => BufferType::Utf8Fragment,
            (false, true) => BufferType::BinaryMessage,
            (false, false) => BufferType::BinaryFragment,
        };
        Ok(EngineAction {
            action: Action::IndicateReceiveComplete,
            buffer_type: Some(buffer_type),
            buffers: vec![NativeRegion::Internal(start..start + take)],
            context: self.next_context(Pending::Indicate {
                len: take,
                buffer_type,
                ping_payload: None,
            }),
        })
    }

    fn consume_indicated(&mut self, len: usize, buffer_type: BufferType, ping: Option<Vec<u8>>) {
        self.receive_queued = false;
        self.inbound.consumed += len;
        match buffer_type {
            BufferType::Close => {
                self.close_received = true;
                self.inbound.frame = None;
            }
            BufferType::Ping => {
                self.inbound.frame = None;
                if let (Some(payload), false) = (ping, self.close_sent) {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.outgoing.push_back(OutgoingFrame {
                        id,
                        origin: ActionQueue::Receive,
                        buffer_type: BufferType::Pong,
                        opcode: Opcode::Pong,
                        fin: true,
                        payload: OutgoingPayload::Control(payload),
                        stage: Stage::Queued,
                    });
                }
            }
            BufferType::Pong | BufferType::UnsolicitedPong => self.inbound.frame = None,
            _ => {
                if let Some(frame) = &mut self.inbound.frame {
                    frame.remaining -= len as u64;
                    if frame.remaining == 0 {
                        if frame.head.fin {
                            self.inbound.message = None;
                        }
                        self.inbound.frame = None;
                    }
                }
            }
        }
    }
}

impl FrameEngine for ProtocolEngine {
    fn begin_handshake(
        &mut self,
        role: Role,
        properties: &EngineProperties,
    ) -> Result<(), EngineError> {
        if properties.receive_buffer_size < MIN_RECEIVE_BUFFER_SIZE {
            return Err(EngineError::InvalidProperties("receive buffer too small"));
        }
        if properties.send_buffer_size < MIN_SEND_BUFFER_SIZE {
            return Err(EngineError::InvalidProperties("send buffer too small"));
        }
        self.role = role;
        self.layout = Some(*properties);
        Ok(())
    }

    fn end_handshake(&mut self) -> Result<(), EngineError> {
        match self.layout {
            Some(_) => {
                self.handshake_complete = true;
                Ok(())
            }
            None => Err(EngineError::HandshakeIncomplete),
        }
    }

    fn send(
        &mut self,
        buffer_type: BufferType,
        payload: SendPayload<'_>,
    ) -> Result<(), EngineError> {
        self.ready()?;
        if self.close_sent {
            return Err(EngineError::CloseAlreadySent);
        }
        let (opcode, fin, payload) = match (buffer_type, payload) {
            (BufferType::Close, SendPayload::Control(data)) if data.len() <= MAX_CONTROL_PAYLOAD => {
                self.close_sent = true;
                (Opcode::Close, true, OutgoingPayload::Control(data.to_vec()))
            }
            (BufferType::Ping, SendPayload::Control(data)) if data.len() <= MAX_CONTROL_PAYLOAD => {
                (Opcode::Ping, true, OutgoingPayload::Control(data.to_vec()))
            }
            (
                BufferType::Pong | BufferType::UnsolicitedPong,
                SendPayload::Control(data),
            ) if data.len() <= MAX_CONTROL_PAYLOAD => {
                (Opcode::Pong, true, OutgoingPayload::Control(data.to_vec()))
            }
            (data_type, SendPayload::Pinned(NativeRegion::PinnedSend(range)))
                if data_type.is_data() =>
            {
                let (opcode, fin) = self.data_opcode(data_type)?;
                (opcode, fin, OutgoingPayload::Pinned(range))
            }
            (other, _) => return Err(EngineError::InvalidSendPayload(other)),
        };
        let id = self.next_id;
        self.next_id += 1;
        self.outgoing.push_back(OutgoingFrame {
            id,
            origin: ActionQueue::Send,
            buffer_type,
            opcode,
            fin,
            payload,
            stage: Stage::Queued,
        });
        Ok(())
    }

    fn receive(&mut self) -> Result<(), EngineError> {
        self.ready()?;
        if self.close_received {
            return Err(EngineError::CloseAlreadyReceived);
        }
        if self.receive_queued {
            return Err(EngineError::ReceiveAlreadyQueued);
        }
        self.receive_queued = true;
        Ok(())
    }

    fn get_action(
        &mut self,
        queue: ActionQueue,
        memory: &mut NativeMemory<'_>,
    ) -> Result<EngineAction, EngineError> {
        if self.aborted {
            return Ok(EngineAction::no_action());
        }
        let layout = self.ready()?;
        if let Some(action) = self.next_outgoing_action(queue, layout, memory)? {
            return Ok(action);
        }
        if queue == ActionQueue::Send || !self.receive_queued {
            return Ok(EngineAction::no_action());
        }
        let indication_outstanding = self.pending.iter().any(|(_, pending)| {
            matches!(pending, Pending::Indicate { .. } | Pending::Fill)
        });
        if indication_outstanding {
            return Ok(EngineAction::no_action());
        }
        self.next_receive_action(memory)
    }

    fn complete_action(
        &mut self,
        context: ActionContext,
        bytes_transferred: usize,
        _memory: &mut NativeMemory<'_>,
    ) -> Result<(), EngineError> {
        let index = match self.pending.iter().position(|(c, _)| *c == context) {
            Some(index) => index,
            None if self.aborted => return Ok(()),
            None => return Err(EngineError::UnknownContext(context)),
        };
        let (_, pending) = self.pending.swap_remove(index);
        match pending {
            Pending::Transmit(id) => {
                if let Some(index) = self.outgoing.iter().position(|f| f.id == id) {
                    let frame = &mut self.outgoing[index];
                    if frame.origin == ActionQueue::Send && bytes_transferred > 0 {
                        frame.stage = Stage::Transmitted;
                    } else {
                        self.outgoing.remove(index);
                    }
                }
            }
            Pending::IndicateSend(id) => self.outgoing.retain(|f| f.id != id),
            Pending::Fill => {
                let capacity = self.layout.map_or(0, |l| l.receive_buffer_size);
                self.inbound.filled = (self.inbound.filled + bytes_transferred).min(capacity);
            }
            Pending::Indicate {
                len,
                buffer_type,
                ping_payload,
            } => self.consume_indicated(len, buffer_type, ping_payload),
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
        self.receive_queued = false;
        self.outgoing.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPERTIES: EngineProperties = EngineProperties {
        receive_buffer_size: 256,
        send_buffer_size: 304,
    };

    struct Memory {
        receive: Vec<u8>,
        send: Vec<u8>,
        pinned: Vec<u8>,
    }

    impl Memory {
        fn new() -> Self {
            Self {
                receive: vec![0u8; PROPERTIES.receive_buffer_size],
                send: vec![0u8; PROPERTIES.send_buffer_size],
                pinned: Vec::new(),
            }
        }
        fn view(&mut self) -> NativeMemory<'_> {
            NativeMemory {
                receive: Some(self.receive.as_mut_slice()),
                send: self.send.as_mut_slice(),
                pinned: Some(self.pinned.as_mut_slice()),
            }
        }
        fn bytes(&self, region: &NativeRegion) -> Vec<u8> {
            match region {
                NativeRegion::Internal(range) if range.start >= PROPERTIES.receive_buffer_size => {
                    let base = PROPERTIES.receive_buffer_size;
                    self.send[range.start - base..range.end - base].to_vec()
                }
                NativeRegion::Internal(range) => self.receive[range.clone()].to_vec(),
                NativeRegion::PinnedSend(range) => self.pinned[range.clone()].to_vec(),
                NativeRegion::Foreign => panic!("foreign region"),
            }
        }
    }

    fn engine(role: Role) -> ProtocolEngine {
        let mut engine = ProtocolEngine::new();
        engine.begin_handshake(role, &PROPERTIES).unwrap();
        engine.end_handshake().unwrap();
        engine
    }

    fn feed(engine: &mut ProtocolEngine, memory: &mut Memory, wire: &[u8]) {
        let action = engine.get_action(ActionQueue::Receive, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::ReceiveFromNetwork);
        let range = match &action.buffers[0] {
            NativeRegion::Internal(range) => range.clone(),
            other => panic!("unexpected region {:?}", other),
        };
        memory.receive[range.start..range.start + wire.len()].copy_from_slice(wire);
        engine
            .complete_action(action.context, wire.len(), &mut memory.view())
            .unwrap();
    }

    #[test]
    fn server_sends_unmasked_binary() {
        let mut engine = engine(Role::Server);
        let mut memory = Memory::new();
        memory.pinned = b"abc".to_vec();
        engine
            .send(
                BufferType::BinaryMessage,
                SendPayload::Pinned(NativeRegion::PinnedSend(0..3)),
            )
            .unwrap();
        let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::SendToNetwork);
        let wire: Vec<u8> = action.buffers.iter().flat_map(|r| memory.bytes(r)).collect();
        assert_eq!(wire, vec![0x82, 0x03, b'a', b'b', b'c']);
        engine.complete_action(action.context, 5, &mut memory.view()).unwrap();

        let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::IndicateSendComplete);
        engine.complete_action(action.context, 0, &mut memory.view()).unwrap();
        let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::NoAction);
    }

    #[test]
    fn fragments_use_continuation_opcode() {
        let mut engine = engine(Role::Server);
        let mut memory = Memory::new();
        memory.pinned = b"xy".to_vec();
        let mut heads = Vec::new();
        for buffer_type in [BufferType::Utf8Fragment, BufferType::Utf8Message] {
            engine
                .send(buffer_type, SendPayload::Pinned(NativeRegion::PinnedSend(0..2)))
                .unwrap();
            let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
            heads.push(memory.bytes(&action.buffers[0])[0]);
            engine.complete_action(action.context, 4, &mut memory.view()).unwrap();
            let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
            engine.complete_action(action.context, 0, &mut memory.view()).unwrap();
        }
        assert_eq!(heads, vec![0x01, 0x80]);
    }

    #[test]
    fn client_masks_payload() {
        let mut engine = engine(Role::Client);
        let mut memory = Memory::new();
        memory.pinned = b"hello".to_vec();
        engine
            .send(
                BufferType::Utf8Message,
                SendPayload::Pinned(NativeRegion::PinnedSend(0..5)),
            )
            .unwrap();
        let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
        let head_bytes = memory.bytes(&action.buffers[0]);
        let head = FrameHead::parse(&head_bytes).unwrap();
        assert!(head.masked());
        let mut payload = memory.bytes(&action.buffers[1]);
        mask(head.mask, 0, &mut payload);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn receives_partial_payload_as_fragments() {
        let mut engine = engine(Role::Client);
        let mut memory = Memory::new();
        engine.receive().unwrap();
        feed(&mut engine, &mut memory, &[0x82, 0x04, 1, 2]);
        let action = engine.get_action(ActionQueue::Receive, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::IndicateReceiveComplete);
        assert_eq!(action.buffer_type, Some(BufferType::BinaryFragment));
        assert_eq!(memory.bytes(&action.buffers[0]), vec![1, 2]);
        engine.complete_action(action.context, 2, &mut memory.view()).unwrap();

        engine.receive().unwrap();
        feed(&mut engine, &mut memory, &[3, 4]);
        let action = engine.get_action(ActionQueue::Receive, &mut memory.view()).unwrap();
        assert_eq!(action.buffer_type, Some(BufferType::BinaryMessage));
        assert_eq!(memory.bytes(&action.buffers[0]), vec![3, 4]);
    }

    #[test]
    fn ping_queues_pong_on_receive_queue() {
        let mut engine = engine(Role::Client);
        let mut memory = Memory::new();
        engine.receive().unwrap();
        feed(&mut engine, &mut memory, &[0x89, 0x01, 7]);
        let action = engine.get_action(ActionQueue::Receive, &mut memory.view()).unwrap();
        assert_eq!(action.buffer_type, Some(BufferType::Ping));
        engine.complete_action(action.context, 1, &mut memory.view()).unwrap();

        let action = engine.get_action(ActionQueue::Send, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::NoAction);
        let action = engine.get_action(ActionQueue::Receive, &mut memory.view()).unwrap();
        assert_eq!(action.action, Action::SendToNetwork);
        let wire = memory.bytes(&action.buffers[0]);
        let head = FrameHead::parse(&wire).unwrap();
        assert_eq!(head.opcode, Opcode::Pong);
        let mut payload = wire[head.len_bytes()..].to_vec();
        mask(head.mask, 0, &mut payload);
        assert_eq!(payload, vec![7]);
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut engine = engine(Role::Client);
        let mut memory = Memory::new();
        engine.receive().unwrap();
        feed(&mut engine, &mut memory, &[0x81, 0x02, 0xc3, 0x28]);
        assert_eq!(
            engine.get_action(ActionQueue::Receive, &mut memory.view()),
            Err(EngineError::InvalidUtf8)
        );
    }

    #[test]
    fn server_rejects_unmasked_frames() {
        let mut engine = engine(Role::Server);
        let mut memory = Memory::new();
        engine.receive().unwrap();
        feed(&mut engine, &mut memory, &[0x82, 0x00]);
        assert!(matches!(
            engine.get_action(ActionQueue::Receive, &mut memory.view()),
            Err(EngineError::Protocol(_))
        ));
    }

    #[test]
    fn no_data_after_close() {
        let mut engine = engine(Role::Server);
        engine
            .send(BufferType::Close, SendPayload::Control(&[0x03, 0xe8]))
            .unwrap();
        assert_eq!(
            engine.send(BufferType::Ping, SendPayload::Control(&[])),
            Err(EngineError::CloseAlreadySent)
        );
    }

    #[test]
    fn abort_drains_to_no_action() {
        let mut engine = engine(Role::Server);
        let mut memory = Memory::new();
        engine.send(BufferType::Ping, SendPayload::Control(&[])).unwrap();
        engine.receive().unwrap();
        engine.abort();
        for queue in [ActionQueue::Send, ActionQueue::Receive] {
            let action = engine.get_action(queue, &mut memory.view()).unwrap();
            assert_eq!(action.action, Action::NoAction);
        }
    }
}
