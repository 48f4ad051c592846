//! The pump shared by every session operation.
//!
//! An operation queues its work with the frame engine and then repeatedly asks the engine for
//! the next action on its queue until it has what it needs. Engine calls happen under the
//! session lock. Network I/O happens with the lock released and races the operation's linked
//! cancellation token. Any failure aborts the whole session.

use crate::frame::{
    Action, ActionContext, ActionQueue, BufferType, EngineAction, FrameEngine, NativeRegion,
};
use crate::session::engine_handle::EngineHandle;
use crate::session::guard::{LinkedToken, OperationGuard};
use crate::session::{lock, SessionState, Shared, WsError};
use futures::{AsyncRead, AsyncWrite};
use std::future::Future;
use std::ops::Range;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) enum Interrupt {
    Canceled,
    Fault(WsError),
}

impl From<WsError> for Interrupt {
    fn from(err: WsError) -> Self {
        Interrupt::Fault(err)
    }
}

/// Session state and engine as seen by an operation hook. Only exists under the session lock.
pub(crate) struct Pump<'a, E> {
    pub session: &'a mut SessionState,
    pub engine: &'a EngineHandle<E>,
}

impl<'a, E: FrameEngine> Pump<'a, E> {
    pub fn complete(&mut self, context: ActionContext, bytes: usize) -> Result<(), WsError> {
        self.engine
            .complete_action(context, bytes, &mut self.session.buffers.native_memory())
    }
}

pub(crate) trait Operation {
    type Output;
    const QUEUE: ActionQueue;

    fn initialize<E: FrameEngine>(&mut self, pump: &mut Pump<'_, E>) -> Result<(), WsError>;

    fn should_continue(&self) -> bool;

    /// The engine has nothing left on this queue. Returns true if the close handshake is now
    /// complete and the transport should be shut down.
    fn on_no_action(&mut self, session: &mut SessionState) -> bool;

    fn on_indicate_receive_complete<E: FrameEngine>(
        &mut self,
        _pump: &mut Pump<'_, E>,
        buffer_type: BufferType,
        _region: &NativeRegion,
        _context: ActionContext,
    ) -> Result<(), WsError> {
        Err(WsError::UnexpectedAction {
            action: Action::IndicateReceiveComplete,
            buffer_type: Some(buffer_type),
        })
    }

    fn on_indicate_send_complete(&mut self, _session: &mut SessionState) {}

    /// Runs on every exit path, under the session lock.
    fn cleanup(&mut self, session: &mut SessionState) {
        session.buffers.release_send();
    }

    fn finish(&mut self) -> Result<Self::Output, WsError>;
}

enum Step {
    Idle,
    Read {
        area: Vec<u8>,
        range: Range<usize>,
        context: ActionContext,
    },
    Write {
        data: Vec<u8>,
        context: ActionContext,
    },
    Flush {
        context: ActionContext,
    },
}

pub(crate) async fn cancellable<F: Future>(
    token: &LinkedToken,
    future: F,
) -> Result<F::Output, Interrupt> {
    let completed = async { Ok(future.await) };
    let canceled = async {
        token.cancelled().await;
        Err(Interrupt::Canceled)
    };
    futures_lite::future::or(completed, canceled).await
}

fn single_region(action: &EngineAction) -> Result<&NativeRegion, WsError> {
    match action.buffers.as_slice() {
        [region] => Ok(region),
        _ => Err(WsError::UnexpectedAction {
            action: action.action,
            buffer_type: action.buffer_type,
        }),
    }
}

// Aborts the session if an operation future is dropped before it finished.
struct AbortOnDrop<'a, T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    shared: &'a Shared<T, E>,
    armed: bool,
}

impl<'a, T, E> Drop for AbortOnDrop<'a, T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    fn drop(&mut self) {
        if self.armed {
            log::debug!("operation dropped while in flight");
            self.shared.abort_session();
        }
    }
}

impl<T, E> Shared<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    pub(crate) async fn execute<O: Operation>(
        &self,
        operation: O,
        token: &LinkedToken,
    ) -> Result<O::Output, WsError> {
        self.run(operation, token, false).await
    }

    /// Runs an operation nobody awaits. A fault is latched for the next public call before the
    /// session is aborted, and comes back as `Faulted`.
    pub(crate) async fn execute_background<O: Operation>(
        &self,
        operation: O,
        token: &LinkedToken,
    ) -> Result<O::Output, WsError> {
        self.run(operation, token, true).await
    }

    async fn run<O: Operation>(
        &self,
        mut operation: O,
        token: &LinkedToken,
        background: bool,
    ) -> Result<O::Output, WsError> {
        let mut scope = AbortOnDrop {
            shared: self,
            armed: true,
        };
        let result = self.pump(&mut operation, token).await;
        scope.armed = false;
        operation.cleanup(&mut lock(&self.session));
        match result {
            Ok(output) => Ok(output),
            Err(interrupt) => {
                let err = match self.interrupted(interrupt, token) {
                    err @ (WsError::Canceled | WsError::Aborted | WsError::Disposed) => {
                        log::debug!("operation ended: {}", err);
                        err
                    }
                    err if background => {
                        log::warn!("background operation failed, aborting session: {}", err);
                        WsError::Faulted(self.latch(err))
                    }
                    err => {
                        log::warn!("operation failed, aborting session: {}", err);
                        err
                    }
                };
                self.abort_session();
                self.transport.release();
                Err(err)
            }
        }
    }

    // Keeps the first background fault until a public call observes it.
    fn latch(&self, err: WsError) -> Arc<WsError> {
        let err = Arc::new(err);
        let mut session = lock(&self.session);
        if session.pending_error.is_none() {
            session.pending_error = Some(err.clone());
        }
        err
    }

    /// Waits until no operation holds `guard`'s slot. Cancellation aborts the session like a
    /// cancelled operation would.
    pub(crate) async fn wait_slot(
        &self,
        guard: &OperationGuard,
        token: &LinkedToken,
    ) -> Result<(), WsError> {
        match cancellable(token, guard.wait_idle()).await {
            Ok(()) => Ok(()),
            Err(interrupt) => {
                let err = self.interrupted(interrupt, token);
                log::debug!("waiting for {} slot: {}", guard.kind(), err);
                self.abort_session();
                Err(err)
            }
        }
    }

    /// Maps an interruption to the error reported to the caller. An explicit abort wins over
    /// whatever the interrupted I/O reported.
    pub(crate) fn interrupted(&self, interrupt: Interrupt, token: &LinkedToken) -> WsError {
        if self.abort_requested.load(Ordering::SeqCst) {
            return WsError::Aborted;
        }
        match interrupt {
            Interrupt::Canceled if token.caller_requested() => WsError::Canceled,
            Interrupt::Canceled => WsError::Aborted,
            Interrupt::Fault(err) => err,
        }
    }

    async fn pump<O: Operation>(
        &self,
        operation: &mut O,
        token: &LinkedToken,
    ) -> Result<O::Output, Interrupt> {
        {
            let mut session = lock(&self.session);
            operation.initialize(&mut Pump {
                session: &mut *session,
                engine: &self.engine,
            })?;
        }
        let mut finish_close = false;
        while operation.should_continue() {
            if token.is_cancelled() {
                return Err(Interrupt::Canceled);
            }
            let step = {
                let mut session = lock(&self.session);
                let session = &mut *session;
                let action = self
                    .engine
                    .get_action(O::QUEUE, &mut session.buffers.native_memory())?;
                log::trace!(
                    "{:?} queue: {:?} {:?}",
                    O::QUEUE,
                    action.action,
                    action.buffer_type
                );
                self.dispatch(operation, session, action, &mut finish_close)?
            };
            match step {
                Step::Idle => {}
                Step::Read {
                    mut area,
                    range,
                    context,
                } => {
                    let read = cancellable(token, self.transport.read(&mut area[range])).await;
                    let mut session = lock(&self.session);
                    session.buffers.restore_receive(area);
                    let count = match read? {
                        Ok(0) => return Err(WsError::ConnectionClosedPrematurely.into()),
                        Ok(count) => count,
                        Err(err) => return Err(WsError::Io(err).into()),
                    };
                    self.keep_alive.on_receive();
                    self.engine
                        .complete_action(context, count, &mut session.buffers.native_memory())?;
                }
                Step::Write { data, context } => {
                    cancellable(token, self.transport.write_all(&data))
                        .await?
                        .map_err(WsError::Io)?;
                    self.keep_alive.on_send();
                    let mut session = lock(&self.session);
                    self.engine.complete_action(
                        context,
                        data.len(),
                        &mut session.buffers.native_memory(),
                    )?;
                }
                Step::Flush { context } => {
                    cancellable(token, self.transport.flush())
                        .await?
                        .map_err(WsError::Io)?;
                    let mut session = lock(&self.session);
                    operation.on_indicate_send_complete(&mut session);
                    self.engine
                        .complete_action(context, 0, &mut session.buffers.native_memory())?;
                }
            }
        }
        if finish_close {
            self.finish_close().await;
        }
        match operation.finish() {
            Ok(output) => Ok(output),
            Err(_) if token.is_cancelled() => Err(Interrupt::Canceled),
            Err(err) => Err(err.into()),
        }
    }

    fn dispatch<O: Operation>(
        &self,
        operation: &mut O,
        session: &mut SessionState,
        action: EngineAction,
        finish_close: &mut bool,
    ) -> Result<Step, WsError> {
        match (action.action, O::QUEUE) {
            (Action::NoAction, _) => {
                if operation.on_no_action(session) {
                    *finish_close = true;
                }
                Ok(Step::Idle)
            }
            (Action::ReceiveFromNetwork, ActionQueue::Receive) => {
                let (area, range) = session.buffers.checkout_receive(single_region(&action)?)?;
                Ok(Step::Read {
                    area,
                    range,
                    context: action.context,
                })
            }
            (Action::SendToNetwork, _) => {
                let data = session.buffers.copy_out(&action.buffers)?;
                Ok(Step::Write {
                    data,
                    context: action.context,
                })
            }
            (Action::IndicateReceiveComplete, ActionQueue::Receive) => {
                let region = single_region(&action)?;
                let buffer_type = action.buffer_type.ok_or(WsError::UnexpectedAction {
                    action: action.action,
                    buffer_type: None,
                })?;
                if !session.buffers.is_native(region) {
                    return Err(WsError::InvalidRegion(region.clone()));
                }
                operation.on_indicate_receive_complete(
                    &mut Pump {
                        session,
                        engine: &self.engine,
                    },
                    buffer_type,
                    region,
                    action.context,
                )?;
                Ok(Step::Idle)
            }
            (Action::IndicateSendComplete, _) => Ok(Step::Flush {
                context: action.context,
            }),
            (other, _) => Err(WsError::UnexpectedAction {
                action: other,
                buffer_type: action.buffer_type,
            }),
        }
    }

    /// Shuts down the write direction once both close frames are through.
    pub(crate) async fn finish_close(&self) {
        {
            let mut session = lock(&self.session);
            if session.transport_closed {
                return;
            }
            session.transport_closed = true;
        }
        match self.transport.close().await {
            Ok(()) => log::debug!("close handshake complete"),
            Err(err) => log::debug!("closing transport: {}", err),
        }
    }
}
