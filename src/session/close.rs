use crate::frame::{Action, ActionQueue, BufferType, FrameEngine, SendPayload};
use crate::message::WsMessageType;
use crate::session::guard::LinkedToken;
use crate::session::operation::{Operation, Pump};
use crate::session::receive::ReceiveOperation;
use crate::session::{lock, OperationKind, SessionState, Shared, WsError, WsState};
use futures::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub(crate) const MAX_CLOSE_REASON: usize = 123;

// Data arriving during `close` is read into this and rejected.
const CLOSE_SCRATCH_SIZE: usize = 256;

pub(crate) fn validate_close(status: u16, reason: &str) -> Result<(), WsError> {
    match status {
        1000..=1003 | 1007..=1014 | 3000..=4999 => {}
        _ => return Err(WsError::InvalidCloseStatus(status)),
    }
    if reason.len() > MAX_CLOSE_REASON {
        return Err(WsError::ReasonTooLong);
    }
    Ok(())
}

pub(crate) struct CloseOutputOperation {
    status: u16,
    reason: String,
    sent: bool,
    done: bool,
    close_complete: bool,
}

impl CloseOutputOperation {
    pub fn new(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
            sent: false,
            done: false,
            close_complete: false,
        }
    }
}

impl Operation for CloseOutputOperation {
    type Output = ();
    const QUEUE: ActionQueue = ActionQueue::Send;

    fn initialize<E: FrameEngine>(&mut self, pump: &mut Pump<'_, E>) -> Result<(), WsError> {
        let mut payload = Vec::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&self.status.to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        pump.engine
            .send(BufferType::Close, SendPayload::Control(&payload))?;
        pump.session.record_close(Some(self.status), self.reason.clone());
        Ok(())
    }

    fn should_continue(&self) -> bool {
        !self.done
    }

    fn on_no_action(&mut self, _session: &mut SessionState) -> bool {
        self.done = true;
        self.close_complete
    }

    fn on_indicate_send_complete(&mut self, session: &mut SessionState) {
        self.sent = true;
        session.state = session.state.on_close_sent();
        self.close_complete = session.state == WsState::Closed;
        log::debug!("close frame sent, now {}", session.state);
    }

    fn finish(&mut self) -> Result<(), WsError> {
        match self.sent {
            true => Ok(()),
            false => Err(WsError::UnexpectedAction {
                action: Action::NoAction,
                buffer_type: Some(BufferType::Close),
            }),
        }
    }
}

impl<T, E> Shared<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    /// Sends our close frame. Caller holds the close-output slot; the send slot is taken here
    /// once any in-flight send has drained.
    pub(crate) async fn close_output(
        &self,
        status: u16,
        reason: &str,
        token: &LinkedToken,
    ) -> Result<(), WsError> {
        let send = loop {
            let admission = self.send_guard.admit(token.caller());
            if admission.token().is_some() {
                break admission;
            }
            drop(admission);
            self.wait_slot(&self.send_guard, token).await?;
        };
        self.check(OperationKind::CloseOutput, WsState::can_send)?;
        let result = self
            .execute(CloseOutputOperation::new(status, reason), token)
            .await;
        drop(send);
        result
    }

    /// Full close handshake: sends our close frame if needed, then waits for the peer's.
    pub(crate) async fn close(
        &self,
        status: u16,
        reason: &str,
        token: &CancellationToken,
    ) -> Result<(), WsError> {
        {
            let mut session = lock(&self.session);
            if let Some(err) = session.pending_error.take() {
                return Err(WsError::Faulted(err));
            }
            if session.state.is_terminal() {
                return Ok(());
            }
        }
        let admission = self.close_guard.admit(token);
        let linked = admission
            .token()
            .cloned()
            .ok_or(WsError::OperationInProgress(OperationKind::Close))?;
        loop {
            let state = lock(&self.session).state;
            match state {
                WsState::Open | WsState::CloseReceived => {
                    let output = self.close_output_guard.admit(token);
                    let output_token = output.token().cloned();
                    match output_token {
                        Some(output_token) => {
                            self.close_output(status, reason, &output_token).await?
                        }
                        None => {
                            drop(output);
                            self.wait_slot(&self.close_output_guard, &linked).await?;
                        }
                    }
                }
                WsState::CloseSent => {
                    let receive = self.receive_guard.admit(token);
                    let receive_token = receive.token().cloned();
                    match receive_token {
                        Some(receive_token) => {
                            let mut scratch = [0u8; CLOSE_SCRATCH_SIZE];
                            let result = self
                                .execute(ReceiveOperation::new(&mut scratch), &receive_token)
                                .await?;
                            if result.message_type != WsMessageType::Close {
                                log::warn!("{} message while closing", result.message_type);
                                self.abort_session();
                                return Err(WsError::InvalidMessageType(result.message_type));
                            }
                        }
                        None => {
                            drop(receive);
                            self.wait_slot(&self.receive_guard, &linked).await?;
                        }
                    }
                }
                WsState::Closed => {
                    self.finish_close().await;
                    return Ok(());
                }
                WsState::Aborted => return Err(WsError::Aborted),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_status_ranges() {
        assert!(validate_close(1000, "").is_ok());
        assert!(validate_close(4999, "bye").is_ok());
        assert!(matches!(
            validate_close(1005, ""),
            Err(WsError::InvalidCloseStatus(1005))
        ));
        assert!(matches!(
            validate_close(999, ""),
            Err(WsError::InvalidCloseStatus(999))
        ));
    }

    #[test]
    fn close_reason_limit() {
        let reason = "x".repeat(MAX_CLOSE_REASON + 1);
        assert!(matches!(validate_close(1000, &reason), Err(WsError::ReasonTooLong)));
    }
}
