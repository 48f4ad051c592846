use crate::frame::{Action, ActionContext, ActionQueue, BufferType, FrameEngine, NativeRegion};
use crate::message::{WsMessageType, WsReceiveResult};
use crate::session::operation::{Operation, Pump};
use crate::session::{SessionState, WsError, WsState};

pub(crate) struct ReceiveOperation<'a> {
    buffer: &'a mut [u8],
    result: Option<WsReceiveResult>,
    done: bool,
    close_complete: bool,
}

impl<'a> ReceiveOperation<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            result: None,
            done: false,
            close_complete: false,
        }
    }
}

fn parse_close(payload: &[u8]) -> (Option<u16>, String) {
    match payload {
        [high, low, reason @ ..] => (
            Some(u16::from_be_bytes([*high, *low])),
            String::from_utf8_lossy(reason).into_owned(),
        ),
        _ => (None, String::new()),
    }
}

impl<'a> Operation for ReceiveOperation<'a> {
    type Output = WsReceiveResult;
    const QUEUE: ActionQueue = ActionQueue::Receive;

    fn initialize<E: FrameEngine>(&mut self, pump: &mut Pump<'_, E>) -> Result<(), WsError> {
        if let Some(result) = pump.session.buffers.drain_into(self.buffer) {
            log::trace!("served {} spilled bytes", result.count);
            self.result = Some(result);
            self.done = true;
            return Ok(());
        }
        pump.engine.receive()
    }

    fn should_continue(&self) -> bool {
        !self.done
    }

    fn on_no_action(&mut self, _session: &mut SessionState) -> bool {
        self.done = true;
        self.close_complete
    }

    fn on_indicate_receive_complete<E: FrameEngine>(
        &mut self,
        pump: &mut Pump<'_, E>,
        buffer_type: BufferType,
        region: &NativeRegion,
        context: ActionContext,
    ) -> Result<(), WsError> {
        match WsMessageType::from_buffer_type(buffer_type) {
            Some((WsMessageType::Close, _)) => {
                let (status, reason) = parse_close(pump.session.buffers.region(region)?);
                log::debug!("close frame received: {:?} {:?}", status, reason);
                pump.session.record_close(status, reason);
                pump.session.state = pump.session.state.on_close_received();
                self.close_complete = pump.session.state == WsState::Closed;
                self.result = Some(WsReceiveResult {
                    count: 0,
                    message_type: WsMessageType::Close,
                    end_of_message: true,
                });
                pump.complete(context, region.len())
            }
            Some((message_type, end_of_message)) => {
                let result =
                    pump.session
                        .buffers
                        .deliver(region, self.buffer, message_type, end_of_message)?;
                self.result = Some(result);
                pump.complete(context, region.len())
            }
            None => {
                // Control frames are consumed here; the caller is waiting for a message.
                log::trace!("{} frame received", buffer_type);
                pump.complete(context, region.len())?;
                pump.engine.receive()
            }
        }
    }

    fn finish(&mut self) -> Result<WsReceiveResult, WsError> {
        self.result.take().ok_or(WsError::UnexpectedAction {
            action: Action::NoAction,
            buffer_type: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::parse_close;

    #[test]
    fn close_payload() {
        assert_eq!(parse_close(&[0x03, 0xe8, b'b', b'y', b'e']), (Some(1000), "bye".into()));
        assert_eq!(parse_close(&[]), (None, String::new()));
    }
}
