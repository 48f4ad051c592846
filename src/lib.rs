//! WebSocket sessions over any `AsyncRead + AsyncWrite` transport.
//!
//! [`session::WsSession`] drives an already upgraded connection: it owns the buffers, performs
//! all network I/O, tracks the close handshake and sends keep-alive pings. Framing is delegated
//! to a [`frame::FrameEngine`]; [`frame::ProtocolEngine`] implements RFC 6455 framing.

pub mod frame;
pub mod message;
pub mod session;

pub use message::{WsMessageType, WsReceiveResult};
pub use session::{WsError, WsSession, WsSessionConfig, WsState};
