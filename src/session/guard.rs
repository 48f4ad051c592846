use futures::channel::oneshot;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
pub enum OperationKind {
    Receive,
    Send,
    CloseOutput,
    Close,
}

/// Cancellation seen by one admitted operation: the caller's token or the guard's internal
/// source, which is itself a child of the session abort source.
#[derive(Clone, Debug)]
pub(crate) struct LinkedToken {
    caller: CancellationToken,
    internal: CancellationToken,
}

impl LinkedToken {
    pub fn new(caller: &CancellationToken, internal: CancellationToken) -> Self {
        Self {
            caller: caller.clone(),
            internal,
        }
    }
    pub fn is_cancelled(&self) -> bool {
        self.caller.is_cancelled() || self.internal.is_cancelled()
    }
    pub fn caller(&self) -> &CancellationToken {
        &self.caller
    }
    pub fn caller_requested(&self) -> bool {
        self.caller.is_cancelled()
    }
    pub async fn cancelled(&self) {
        futures_lite::future::or(self.caller.cancelled(), self.internal.cancelled()).await
    }
}

#[derive(Default)]
struct GuardState {
    count: usize,
    source: Option<CancellationToken>,
    // The admitted operation runs for the keep-alive timer, not for a caller.
    background: bool,
    disposed: bool,
    idle: Vec<oneshot::Sender<()>>,
}

/// At most one admitted operation per kind.
///
/// Every `try_start` has to be paired with a `complete`, admitted or not. The internal source
/// is only ever created by the admitted caller, which is the one that passes `owned_source`.
pub(crate) struct OperationGuard {
    kind: OperationKind,
    abort: CancellationToken,
    state: Mutex<GuardState>,
}

impl OperationGuard {
    pub fn new(kind: OperationKind, abort: &CancellationToken) -> Self {
        Self {
            kind,
            abort: abort.clone(),
            state: Mutex::new(GuardState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Counts one more outstanding operation. Only the first is admitted; `background` marks
    /// it as running for the keep-alive timer rather than for a caller.
    pub fn try_start(
        &self,
        caller: &CancellationToken,
        background: bool,
    ) -> Result<LinkedToken, Refused> {
        let mut state = self.lock();
        if state.disposed {
            return Err(Refused {
                behind_background: false,
            });
        }
        state.count += 1;
        if state.count != 1 {
            log::trace!("{} not admitted, {} outstanding", self.kind, state.count);
            return Err(Refused {
                behind_background: state.background,
            });
        }
        let internal = self.abort.child_token();
        state.source = Some(internal.clone());
        state.background = background;
        Ok(LinkedToken::new(caller, internal))
    }

    pub fn complete(&self, owned_source: bool) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.count = state.count.saturating_sub(1);
        if owned_source {
            state.source = None;
            state.background = false;
        }
        if state.count == 0 {
            for waiter in state.idle.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    pub fn cancel_io(&self) {
        let state = self.lock();
        if let Some(source) = &state.source {
            source.cancel();
        }
    }

    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        if let Some(source) = state.source.take() {
            source.cancel();
        }
        for waiter in state.idle.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Resolves once no operation of this kind is outstanding.
    pub async fn wait_idle(&self) {
        let receiver = {
            let mut state = self.lock();
            if state.count == 0 || state.disposed {
                return;
            }
            let (sender, receiver) = oneshot::channel();
            state.idle.push(sender);
            receiver
        };
        let _ = receiver.await;
    }

    /// Starts an operation whose completion is tied to the returned value's lifetime.
    pub fn admit(&self, caller: &CancellationToken) -> Admission<'_> {
        Admission {
            guard: self,
            start: self.try_start(caller, false),
        }
    }

    /// Like `admit`, for work nobody awaits. Callers refused while it holds the slot can tell.
    pub fn admit_background(&self, caller: &CancellationToken) -> Admission<'_> {
        Admission {
            guard: self,
            start: self.try_start(caller, true),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Refused {
    pub behind_background: bool,
}

/// Scope of one `try_start`; calls `complete` when dropped.
pub(crate) struct Admission<'a> {
    guard: &'a OperationGuard,
    start: Result<LinkedToken, Refused>,
}

impl<'a> Admission<'a> {
    pub fn token(&self) -> Option<&LinkedToken> {
        self.start.as_ref().ok()
    }

    /// Refused because a background operation holds the slot.
    pub fn behind_background(&self) -> bool {
        matches!(
            self.start,
            Err(Refused {
                behind_background: true
            })
        )
    }
}

impl<'a> Drop for Admission<'a> {
    fn drop(&mut self) {
        self.guard.complete(self.start.is_ok());
    }
}
