use crate::frame::{EngineProperties, Role};
use crate::session::WsError;
use std::time::Duration;

const MIN_RECEIVE_BUFFER_SIZE: usize = 256;
const MIN_SEND_BUFFER_SIZE: usize = 16;
const MAX_BUFFER_SIZE: usize = 64 * 1024;

pub struct WsSessionConfig {
    pub role: Role,
    pub receive_buffer_size: usize,
    pub send_buffer_size: usize,
    /// Idle period after which a ping is sent. Zero disables keep-alive.
    pub keep_alive_interval: Duration,
    /// Sub-protocol agreed during the opening handshake, if any.
    pub sub_protocol: Option<String>,
    _private: (),
}

impl WsSessionConfig {
    pub fn client() -> Self {
        Self {
            role: Role::Client,
            receive_buffer_size: 16 * 1024,
            send_buffer_size: 512,
            keep_alive_interval: Duration::from_secs(30),
            sub_protocol: None,
            _private: (),
        }
    }
    pub fn server() -> Self {
        Self {
            role: Role::Server,
            receive_buffer_size: 16 * 1024,
            send_buffer_size: 512,
            keep_alive_interval: Duration::from_secs(30),
            sub_protocol: None,
            _private: (),
        }
    }
    pub(crate) fn validate(&self) -> Result<(), WsError> {
        if !(MIN_RECEIVE_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.receive_buffer_size) {
            return Err(WsError::InvalidConfig("receive_buffer_size"));
        }
        if !(MIN_SEND_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.send_buffer_size) {
            return Err(WsError::InvalidConfig("send_buffer_size"));
        }
        Ok(())
    }
    pub(crate) fn properties(&self) -> EngineProperties {
        EngineProperties {
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
        }
    }
}
