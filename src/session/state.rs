#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum WsState {
    Open,
    CloseSent,
    CloseReceived,
    Closed,
    Aborted,
}

impl WsState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WsState::Closed | WsState::Aborted)
    }
    pub(crate) fn can_receive(&self) -> bool {
        matches!(self, WsState::Open | WsState::CloseSent)
    }
    pub(crate) fn can_send(&self) -> bool {
        matches!(self, WsState::Open | WsState::CloseReceived)
    }
    // State after our close frame went out.
    pub(crate) fn on_close_sent(self) -> Self {
        match self {
            WsState::Open => WsState::CloseSent,
            WsState::CloseReceived => WsState::Closed,
            other => other,
        }
    }
    // State after the peer's close frame arrived.
    pub(crate) fn on_close_received(self) -> Self {
        match self {
            WsState::Open => WsState::CloseReceived,
            WsState::CloseSent => WsState::Closed,
            other => other,
        }
    }
}
