use async_io::Async;
use async_ws_session::frame::{
    mask, Action, ActionContext, ActionQueue, BufferType, EngineAction, EngineError,
    EngineProperties, FrameEngine, FrameHead, NativeMemory, NativeRegion, Opcode, Role,
    SendPayload,
};
use async_ws_session::session::{WsSession, WsSessionConfig};
use futures::future::join;
use futures::task::AtomicWaker;
use futures::{AsyncRead, AsyncWrite};
use std::io;
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

pub type Tcp = Async<TcpStream>;

pub async fn tcp_pair() -> (Tcp, Tcp) {
    let listener = Async::<TcpListener>::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = listener.get_ref().local_addr().unwrap();
    let (accepted, connected) = join(listener.accept(), Async::<TcpStream>::connect(addr)).await;
    (accepted.unwrap().0, connected.unwrap())
}

pub fn server_config(keep_alive: Option<Duration>) -> WsSessionConfig {
    let mut config = WsSessionConfig::server();
    config.keep_alive_interval = keep_alive.unwrap_or(Duration::ZERO);
    config
}

pub fn client_config() -> WsSessionConfig {
    let mut config = WsSessionConfig::client();
    config.keep_alive_interval = Duration::ZERO;
    config
}

#[allow(dead_code)]
pub async fn start_server_ws_and_client_transport(
    keep_alive: Option<Duration>,
) -> (WsSession<Tcp>, Tcp) {
    let (server, client) = tcp_pair().await;
    let server = WsSession::with_config(server, server_config(keep_alive)).unwrap();
    (server, client)
}

#[allow(dead_code)]
pub async fn start_server_and_client() -> (WsSession<Tcp>, WsSession<Tcp>) {
    let (server, client) = tcp_pair().await;
    let server = WsSession::with_config(server, server_config(None)).unwrap();
    let client = WsSession::with_config(client, client_config()).unwrap();
    (server, client)
}

/// A complete masked frame as a client would put it on the wire.
#[allow(dead_code)]
pub fn client_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
    let head = FrameHead {
        fin,
        opcode,
        mask: [0x11, 0x22, 0x33, 0x44],
        payload_len: payload.len() as u64,
    };
    let mut buffer = vec![0u8; 14 + payload.len()];
    let head_len = head.encode(&mut buffer);
    buffer[head_len..head_len + payload.len()].copy_from_slice(payload);
    mask(head.mask, 0, &mut buffer[head_len..head_len + payload.len()]);
    buffer.truncate(head_len + payload.len());
    buffer
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(dead_code)]
enum GateState {
    Shut,
    Open,
    Broken,
}

#[allow(dead_code)]
struct GateInner {
    state: Mutex<GateState>,
    waker: AtomicWaker,
    written: Mutex<Vec<u8>>,
}

/// Controls a [`GatedTransport`]: writes stall until the gate opens, or fail once it breaks.
/// Reads never complete.
#[derive(Clone)]
#[allow(dead_code)]
pub struct Gate {
    inner: Arc<GateInner>,
}

#[allow(dead_code)]
impl Gate {
    pub fn shut() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState::Shut),
                waker: AtomicWaker::new(),
                written: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn open(&self) {
        *self.inner.state.lock().unwrap() = GateState::Open;
        self.inner.waker.wake();
    }

    pub fn break_writes(&self) {
        *self.inner.state.lock().unwrap() = GateState::Broken;
        self.inner.waker.wake();
    }

    pub fn written(&self) -> Vec<u8> {
        self.inner.written.lock().unwrap().clone()
    }

    pub fn transport(&self) -> GatedTransport {
        GatedTransport { gate: self.clone() }
    }

    fn state(&self) -> GateState {
        *self.inner.state.lock().unwrap()
    }
}

#[allow(dead_code)]
pub struct GatedTransport {
    gate: Gate,
}

impl AsyncRead for GatedTransport {
    fn poll_read(self: Pin<&mut Self>, _: &mut Context<'_>, _: &mut [u8]) -> Poll<io::Result<usize>> {
        Poll::Pending
    }
}

impl AsyncWrite for GatedTransport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.gate.inner.waker.register(cx.waker());
        match self.gate.state() {
            GateState::Shut => Poll::Pending,
            GateState::Broken => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            GateState::Open => {
                self.gate.inner.written.lock().unwrap().extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.gate.state() {
            GateState::Broken => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
            _ => Poll::Ready(Ok(())),
        }
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[allow(dead_code)]
pub fn start_gated_server(gate: &Gate, keep_alive: Option<Duration>) -> WsSession<GatedTransport> {
    WsSession::with_config(gate.transport(), server_config(keep_alive)).unwrap()
}

/// A frame engine that hands the session `region` for every network read and write.
#[allow(dead_code)]
pub struct StrayRegionEngine {
    region: NativeRegion,
    receive_queued: bool,
    send_queued: bool,
}

#[allow(dead_code)]
impl StrayRegionEngine {
    pub fn new(region: NativeRegion) -> Self {
        Self {
            region,
            receive_queued: false,
            send_queued: false,
        }
    }

    fn action(&self, action: Action) -> EngineAction {
        EngineAction {
            action,
            buffer_type: None,
            buffers: vec![self.region.clone()],
            context: ActionContext(1),
        }
    }
}

impl FrameEngine for StrayRegionEngine {
    fn begin_handshake(&mut self, _: Role, _: &EngineProperties) -> Result<(), EngineError> {
        Ok(())
    }

    fn end_handshake(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn send(&mut self, _: BufferType, _: SendPayload<'_>) -> Result<(), EngineError> {
        self.send_queued = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<(), EngineError> {
        self.receive_queued = true;
        Ok(())
    }

    fn get_action(
        &mut self,
        queue: ActionQueue,
        _: &mut NativeMemory<'_>,
    ) -> Result<EngineAction, EngineError> {
        Ok(match queue {
            ActionQueue::Receive if self.receive_queued => self.action(Action::ReceiveFromNetwork),
            ActionQueue::Send if self.send_queued => self.action(Action::SendToNetwork),
            _ => EngineAction::no_action(),
        })
    }

    fn complete_action(
        &mut self,
        _: ActionContext,
        _: usize,
        _: &mut NativeMemory<'_>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn abort(&mut self) {
        self.receive_queued = false;
        self.send_queued = false;
    }
}
