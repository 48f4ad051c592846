use crate::frame::{
    Action, ActionContext, ActionQueue, BufferType, EngineAction, EngineError, EngineProperties,
    FrameEngine, NativeMemory, Role, SendPayload,
};
use crate::session::WsError;
use std::sync::{Mutex, MutexGuard, PoisonError};

// Upper bound on drain iterations per queue after an abort.
const MAX_DRAIN_STEPS: usize = 64;

/// Owner of the frame engine. Every call goes through one lock, taken after the session lock.
pub(crate) struct EngineHandle<E> {
    engine: Mutex<Option<E>>,
}

impl<E: FrameEngine> EngineHandle<E> {
    pub fn new(mut engine: E, role: Role, properties: &EngineProperties) -> Result<Self, WsError> {
        engine.begin_handshake(role, properties)?;
        engine.end_handshake()?;
        Ok(Self {
            engine: Mutex::new(Some(engine)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<E>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with<R>(&self, f: impl FnOnce(&mut E) -> Result<R, EngineError>) -> Result<R, WsError> {
        match self.lock().as_mut() {
            Some(engine) => Ok(f(engine)?),
            None => Err(WsError::Disposed),
        }
    }

    pub fn send(&self, buffer_type: BufferType, payload: SendPayload<'_>) -> Result<(), WsError> {
        self.with(|engine| engine.send(buffer_type, payload))
    }

    pub fn receive(&self) -> Result<(), WsError> {
        self.with(|engine| engine.receive())
    }

    pub fn get_action(
        &self,
        queue: ActionQueue,
        memory: &mut NativeMemory<'_>,
    ) -> Result<EngineAction, WsError> {
        self.with(|engine| engine.get_action(queue, memory))
    }

    pub fn complete_action(
        &self,
        context: ActionContext,
        bytes_transferred: usize,
        memory: &mut NativeMemory<'_>,
    ) -> Result<(), WsError> {
        self.with(|engine| engine.complete_action(context, bytes_transferred, memory))
    }

    /// Aborts the engine and completes whatever it still has queued with zero bytes.
    pub fn abort(&self, memory: &mut NativeMemory<'_>) {
        let mut guard = self.lock();
        let engine = match guard.as_mut() {
            Some(engine) => engine,
            None => return,
        };
        engine.abort();
        for queue in [ActionQueue::Send, ActionQueue::Receive] {
            for _ in 0..MAX_DRAIN_STEPS {
                match engine.get_action(queue, memory) {
                    Ok(action) if action.action == Action::NoAction => break,
                    Ok(action) => {
                        log::trace!("draining {:?} on {:?} queue", action.action, queue);
                        if engine.complete_action(action.context, 0, memory).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::debug!("engine drain stopped: {}", err);
                        break;
                    }
                }
            }
        }
    }

    /// Drops the engine. Later calls fail with `Disposed`.
    pub fn delete(&self) {
        self.lock().take();
    }
}
