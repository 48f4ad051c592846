use crate::frame::{Action, ActionQueue, BufferType, FrameEngine, SendPayload};
use crate::session::operation::{Operation, Pump};
use crate::session::{SessionState, WsError};

enum Payload<'a> {
    Pinned(&'a [u8]),
    Control(Vec<u8>),
}

/// One data message, fragment or ping.
pub(crate) struct SendOperation<'a> {
    buffer_type: BufferType,
    payload: Payload<'a>,
    sent: bool,
    done: bool,
}

impl<'a> SendOperation<'a> {
    pub fn data(payload: &'a [u8], buffer_type: BufferType) -> Self {
        Self {
            buffer_type,
            payload: Payload::Pinned(payload),
            sent: false,
            done: false,
        }
    }
    pub fn ping() -> Self {
        Self {
            buffer_type: BufferType::Ping,
            payload: Payload::Control(Vec::new()),
            sent: false,
            done: false,
        }
    }
}

impl<'a> Operation for SendOperation<'a> {
    type Output = ();
    const QUEUE: ActionQueue = ActionQueue::Send;

    fn initialize<E: FrameEngine>(&mut self, pump: &mut Pump<'_, E>) -> Result<(), WsError> {
        match &self.payload {
            Payload::Pinned(payload) => {
                let region = pump.session.buffers.pin_send(payload)?;
                pump.engine.send(self.buffer_type, SendPayload::Pinned(region))
            }
            Payload::Control(payload) => pump
                .engine
                .send(self.buffer_type, SendPayload::Control(payload)),
        }
    }

    fn should_continue(&self) -> bool {
        !self.done
    }

    fn on_no_action(&mut self, _session: &mut SessionState) -> bool {
        self.done = true;
        false
    }

    fn on_indicate_send_complete(&mut self, session: &mut SessionState) {
        session.buffers.release_send();
        self.sent = true;
    }

    fn finish(&mut self) -> Result<(), WsError> {
        match self.sent {
            true => Ok(()),
            false => Err(WsError::UnexpectedAction {
                action: Action::NoAction,
                buffer_type: Some(self.buffer_type),
            }),
        }
    }
}
