mod buffers;
mod close;
mod config;
mod engine_handle;
mod guard;
mod keep_alive;
mod operation;
mod receive;
mod send;
mod state;
mod transport;

pub use config::*;
pub use guard::OperationKind;
pub use state::WsState;

use crate::frame::{Action, BufferType, EngineError, FrameEngine, NativeRegion, ProtocolEngine};
use crate::message::{WsMessageType, WsReceiveResult};
use buffers::BufferManager;
use engine_handle::EngineHandle;
use futures::{AsyncRead, AsyncWrite};
use guard::{LinkedToken, OperationGuard};
use keep_alive::KeepAliveTracker;
use receive::ReceiveOperation;
use send::SendOperation;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use transport::Transport;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SessionState {
    state: WsState,
    close_status: Option<u16>,
    close_reason: Option<String>,
    close_recorded: bool,
    pending_error: Option<Arc<WsError>>,
    buffers: BufferManager,
    transport_closed: bool,
}

impl SessionState {
    // The first close frame seen, sent or received, decides the reported status.
    fn record_close(&mut self, status: Option<u16>, reason: String) {
        if self.close_recorded {
            return;
        }
        self.close_recorded = true;
        self.close_status = status;
        self.close_reason = Some(reason);
    }
}

pub(crate) struct Shared<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    session: Mutex<SessionState>,
    engine: EngineHandle<E>,
    transport: Transport<T>,
    abort_source: CancellationToken,
    shutdown: CancellationToken,
    receive_guard: OperationGuard,
    send_guard: OperationGuard,
    close_output_guard: OperationGuard,
    close_guard: OperationGuard,
    keep_alive: KeepAliveTracker,
    abort_requested: AtomicBool,
    disposed: AtomicBool,
    sub_protocol: Option<String>,
}

impl<T, E> Shared<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    /// Surfaces a latched background fault, then checks the operation is valid in the current
    /// state.
    fn check(&self, operation: OperationKind, admissible: fn(&WsState) -> bool) -> Result<(), WsError> {
        let mut session = lock(&self.session);
        if let Some(err) = session.pending_error.take() {
            return Err(WsError::Faulted(err));
        }
        match admissible(&session.state) {
            true => Ok(()),
            false => Err(WsError::InvalidState {
                operation,
                state: session.state,
            }),
        }
    }

    fn guards(&self) -> [&OperationGuard; 4] {
        [
            &self.receive_guard,
            &self.send_guard,
            &self.close_output_guard,
            &self.close_guard,
        ]
    }

    /// Moves a live session to `Aborted`, cancels everything in flight and drains the engine.
    /// No-op once the session is terminal.
    pub(crate) fn abort_session(&self) {
        {
            let mut session = lock(&self.session);
            if session.state.is_terminal() {
                return;
            }
            log::debug!("aborting session in state {}", session.state);
            session.state = WsState::Aborted;
            let session = &mut *session;
            self.engine.abort(&mut session.buffers.native_memory());
            session.buffers.release_send();
        }
        self.abort_source.cancel();
        for guard in self.guards() {
            guard.cancel_io();
        }
        self.transport.release();
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort_requested.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
        self.abort_session();
        for guard in self.guards() {
            guard.dispose();
        }
        {
            let mut session = lock(&self.session);
            let session = &mut *session;
            self.engine.abort(&mut session.buffers.native_memory());
            self.engine.delete();
            session.buffers.dispose();
        }
        self.transport.release();
        log::trace!("session disposed");
    }
}

/// A WebSocket session over an established transport.
///
/// The opening handshake is expected to be complete: `transport` carries WebSocket frames from
/// its first byte. Framing is delegated to a [`FrameEngine`]; the session owns memory, I/O,
/// state and cancellation. At most one receive, one send, one close-output and one close may be
/// in flight at a time, each from any task. Every operation takes a cancellation token;
/// cancelling it, or any failure, aborts the session.
pub struct WsSession<T, E = ProtocolEngine>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    shared: Arc<Shared<T, E>>,
}

impl<T> WsSession<T, ProtocolEngine>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn with_config(transport: T, config: WsSessionConfig) -> Result<Self, WsError> {
        Self::new(transport, ProtocolEngine::new(), config)
    }
}

impl<T, E> WsSession<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    pub fn new(transport: T, engine: E, config: WsSessionConfig) -> Result<Self, WsError> {
        config.validate()?;
        let engine = EngineHandle::new(engine, config.role, &config.properties())?;
        let abort_source = CancellationToken::new();
        let shared = Arc::new(Shared {
            session: Mutex::new(SessionState {
                state: WsState::Open,
                close_status: None,
                close_reason: None,
                close_recorded: false,
                pending_error: None,
                buffers: BufferManager::new(config.receive_buffer_size, config.send_buffer_size),
                transport_closed: false,
            }),
            engine,
            transport: Transport::new(transport),
            receive_guard: OperationGuard::new(OperationKind::Receive, &abort_source),
            send_guard: OperationGuard::new(OperationKind::Send, &abort_source),
            close_output_guard: OperationGuard::new(OperationKind::CloseOutput, &abort_source),
            close_guard: OperationGuard::new(OperationKind::Close, &abort_source),
            abort_source,
            shutdown: CancellationToken::new(),
            keep_alive: KeepAliveTracker::new(config.keep_alive_interval),
            abort_requested: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            sub_protocol: config.sub_protocol,
        });
        if shared.keep_alive.enabled() {
            keep_alive::spawn(&shared, shared.shutdown.clone())?;
        }
        log::debug!("{:?} session open", config.role);
        Ok(Self { shared })
    }

    /// Receives into `buffer`. Payload that does not fit is returned by the following receives,
    /// with `end_of_message` set only on the last part.
    pub async fn receive(
        &self,
        buffer: &mut [u8],
        token: &CancellationToken,
    ) -> Result<WsReceiveResult, WsError> {
        let shared = &*self.shared;
        shared.check(OperationKind::Receive, WsState::can_receive)?;
        let admission = shared.receive_guard.admit(token);
        let linked = admission
            .token()
            .cloned()
            .ok_or(WsError::OperationInProgress(shared.receive_guard.kind()))?;
        shared
            .execute(ReceiveOperation::new(buffer), &linked)
            .await
    }

    /// Sends a text or binary message, or a fragment of one when `end_of_message` is false.
    pub async fn send(
        &self,
        payload: &[u8],
        message_type: WsMessageType,
        end_of_message: bool,
        token: &CancellationToken,
    ) -> Result<(), WsError> {
        let buffer_type = message_type
            .buffer_type(end_of_message)
            .ok_or(WsError::InvalidMessageType(message_type))?;
        let shared = &*self.shared;
        shared.check(OperationKind::Send, WsState::can_send)?;
        let mut admission = shared.send_guard.admit(token);
        if admission.behind_background() {
            drop(admission);
            let waiting = LinkedToken::new(token, shared.abort_source.child_token());
            shared.wait_slot(&shared.send_guard, &waiting).await?;
            shared.check(OperationKind::Send, WsState::can_send)?;
            admission = shared.send_guard.admit(token);
        }
        let linked = admission
            .token()
            .cloned()
            .ok_or(WsError::OperationInProgress(shared.send_guard.kind()))?;
        shared
            .execute(SendOperation::data(payload, buffer_type), &linked)
            .await
    }

    /// Sends a close frame without waiting for the peer's. Receiving stays possible until the
    /// peer's close frame arrives.
    pub async fn close_output(
        &self,
        status: u16,
        reason: &str,
        token: &CancellationToken,
    ) -> Result<(), WsError> {
        close::validate_close(status, reason)?;
        let shared = &*self.shared;
        shared.check(OperationKind::CloseOutput, WsState::can_send)?;
        let admission = shared.close_output_guard.admit(token);
        let linked = admission
            .token()
            .cloned()
            .ok_or(WsError::OperationInProgress(shared.close_output_guard.kind()))?;
        shared.close_output(status, reason, &linked).await
    }

    /// Completes the close handshake. Returns immediately once the session is terminal.
    pub async fn close(
        &self,
        status: u16,
        reason: &str,
        token: &CancellationToken,
    ) -> Result<(), WsError> {
        close::validate_close(status, reason)?;
        self.shared.close(status, reason, token).await
    }

    /// Tears the session down without a close handshake. Never fails and may be repeated.
    pub fn abort(&self) {
        self.shared.abort_requested.store(true, Ordering::SeqCst);
        self.shared.abort_session();
    }

    /// Releases the engine, buffers and transport. Idempotent; also runs on drop.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn state(&self) -> WsState {
        lock(&self.shared.session).state
    }

    pub fn close_status(&self) -> Option<u16> {
        lock(&self.shared.session).close_status
    }

    pub fn close_reason(&self) -> Option<String> {
        lock(&self.shared.session).close_reason.clone()
    }

    pub fn sub_protocol(&self) -> Option<&str> {
        self.shared.sub_protocol.as_deref()
    }
}

impl<T, E> Drop for WsSession<T, E>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: FrameEngine,
{
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

#[derive(thiserror::Error, Debug)]
pub enum WsError {
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        operation: OperationKind,
        state: WsState,
    },
    #[error("a {0} operation is already in progress")]
    OperationInProgress(OperationKind),
    #[error("connection closed without completing the close handshake")]
    ConnectionClosedPrematurely,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("session faulted: {0}")]
    Faulted(Arc<WsError>),
    #[error("frame engine error: {0}")]
    NativeError(#[from] EngineError),
    #[error("frame engine returned {action:?} ({buffer_type:?}) unexpectedly")]
    UnexpectedAction {
        action: Action,
        buffer_type: Option<BufferType>,
    },
    #[error("region {0:?} lies outside session memory")]
    InvalidRegion(NativeRegion),
    #[error("unexpected {0} message")]
    InvalidMessageType(WsMessageType),
    #[error("operation canceled")]
    Canceled,
    #[error("session aborted")]
    Aborted,
    #[error("session disposed")]
    Disposed,
    #[error("a send buffer is already pinned")]
    AlreadyPinned,
    #[error("invalid close status {0}")]
    InvalidCloseStatus(u16),
    #[error("close reason longer than 123 bytes")]
    ReasonTooLong,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}
