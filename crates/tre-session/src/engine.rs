use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tre_core::{EventSink, PayloadExtractor, StepResult, StepSpec};

use crate::action::{ActionRunner, MarkerActions};
use crate::control::{Control, LineStats};
use crate::emit::Emitter;
use crate::error::SessionError;
use crate::lifecycle::{SessionState, Trigger};
use crate::transport::{ConnectOptions, Connector, Endpoint, TcpConnector};
use crate::worker::Worker;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect: ConnectOptions,
    /// Reconnects attempted after the stream drops before giving up.
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Timeout for steps whose document sets none.
    pub default_step_timeout: Option<Duration>,
    pub extractor: PayloadExtractor,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            reconnect_attempts: 0,
            reconnect_delay: Duration::from_secs(1),
            default_step_timeout: None,
            extractor: PayloadExtractor::default(),
        }
    }
}

/// Final state of a session and every verdict it emitted, in step order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub results: Vec<StepResult>,
    pub lines: LineStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Owner of the single live-session slot.
pub struct Engine {
    slot: Mutex<Option<Arc<Control>>>,
    connector: Arc<dyn Connector>,
    actions: Arc<dyn ActionRunner>,
    options: SessionOptions,
}

impl Engine {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_connector(options, Arc::new(TcpConnector))
    }

    pub fn with_connector(options: SessionOptions, connector: Arc<dyn Connector>) -> Self {
        Self {
            slot: Mutex::new(None),
            connector,
            actions: Arc::new(MarkerActions),
            options,
        }
    }

    pub fn with_actions(mut self, actions: Arc<dyn ActionRunner>) -> Self {
        self.actions = actions;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Claims the slot for a new session. A session that reached a terminal
    /// state no longer holds it.
    pub fn try_acquire(&self) -> Result<Arc<Control>, SessionError> {
        let mut slot = lock(&self.slot);
        if let Some(current) = slot.as_ref() {
            let state = current.state();
            if !state.is_terminal() {
                return Err(SessionError::AlreadyActive(state));
            }
        }
        let control = Arc::new(Control::new());
        *slot = Some(Arc::clone(&control));
        Ok(control)
    }

    /// Frees the slot if `control` still owns it.
    pub fn release(&self, control: &Arc<Control>) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, control)) {
            *slot = None;
        }
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.slot)
            .as_ref()
            .is_some_and(|current| !current.state().is_terminal())
    }

    /// Starts a session on a worker thread and returns at `Connecting`.
    pub fn start(
        &self,
        endpoint: Endpoint,
        steps: Vec<StepSpec>,
        sink: Arc<dyn EventSink>,
    ) -> Result<SessionHandle, SessionError> {
        let control = self.try_acquire()?;
        if let Err(err) = control.fire(Trigger::Start) {
            self.release(&control);
            return Err(err.into());
        }
        let emitter = Arc::new(Emitter::new(sink));
        let worker = Worker {
            control: Arc::clone(&control),
            emitter: Arc::clone(&emitter),
            connector: Arc::clone(&self.connector),
            actions: Arc::clone(&self.actions),
            endpoint,
            steps,
            options: self.options.clone(),
        };
        let handle = match thread::Builder::new()
            .name("tre-session".to_string())
            .spawn(move || worker.run_guarded())
        {
            Ok(handle) => handle,
            Err(err) => {
                self.release(&control);
                return Err(SessionError::Spawn(err));
            }
        };
        Ok(SessionHandle {
            control,
            emitter,
            worker_thread: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
            outcome: Mutex::new(None),
        })
    }
}

/// Caller-side view of a running session.
pub struct SessionHandle {
    control: Arc<Control>,
    emitter: Arc<Emitter>,
    worker_thread: ThreadId,
    worker: Mutex<Option<JoinHandle<SessionOutcome>>>,
    outcome: Mutex<Option<SessionOutcome>>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    pub fn stats(&self) -> LineStats {
        self.control.stats()
    }

    /// Running -> Paused. Lines arriving while paused are discarded.
    pub fn pause(&self) -> bool {
        match self.control.fire(Trigger::Pause) {
            Ok(_) => {
                self.emitter.status("Paused.");
                true
            }
            Err(err) => {
                self.emitter.status(&format!("Pause ignored: {err}."));
                false
            }
        }
    }

    pub fn resume(&self) -> bool {
        match self.control.fire(Trigger::Resume) {
            Ok(_) => {
                self.emitter.status("Resumed.");
                true
            }
            Err(err) => {
                self.emitter.status(&format!("Resume ignored: {err}."));
                false
            }
        }
    }

    /// Asks the worker to wind down without waiting for it.
    pub fn request_stop(&self) -> bool {
        match self.control.fire(Trigger::StopRequested) {
            Ok(_) => {
                self.emitter.status("Stopping...");
                true
            }
            Err(err) => {
                tracing::debug!("stop ignored: {err}");
                false
            }
        }
    }

    /// Requests a stop and waits for the worker to exit. Called from inside
    /// an event handler it only requests the stop.
    pub fn stop(&self) -> Option<SessionOutcome> {
        self.request_stop();
        self.join()
    }

    /// Waits for the worker to finish on its own.
    pub fn join(&self) -> Option<SessionOutcome> {
        if thread::current().id() == self.worker_thread {
            return None;
        }
        let mut worker = lock(&self.worker);
        if let Some(handle) = worker.take() {
            let outcome = match handle.join() {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::error!("session worker panicked");
                    let _ = self.control.fire(Trigger::WorkerPanicked);
                    SessionOutcome {
                        state: self.control.state(),
                        results: Vec::new(),
                        lines: self.control.stats(),
                    }
                }
            };
            *lock(&self.outcome) = Some(outcome);
        }
        drop(worker);
        lock(&self.outcome).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.control.state().is_terminal()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.control.state().is_terminal() {
            self.request_stop();
        }
        let _ = self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::{Engine, SessionOptions};
    use crate::error::SessionError;
    use crate::lifecycle::{SessionState, Trigger};

    #[test]
    fn slot_rejects_second_live_session() {
        let engine = Engine::new(SessionOptions::default());
        let first = match engine.try_acquire() {
            Ok(control) => control,
            Err(err) => panic!("acquire: {err}"),
        };
        assert!(first.fire(Trigger::Start).is_ok());
        assert!(engine.is_busy());
        assert!(matches!(
            engine.try_acquire(),
            Err(SessionError::AlreadyActive(SessionState::Connecting))
        ));
        assert!(first.fire(Trigger::ConnectFailed).is_ok());
        assert!(!engine.is_busy());
        assert!(engine.try_acquire().is_ok());
    }

    #[test]
    fn release_only_clears_own_control() {
        let engine = Engine::new(SessionOptions::default());
        let first = match engine.try_acquire() {
            Ok(control) => control,
            Err(err) => panic!("acquire: {err}"),
        };
        engine.release(&first);
        let second = match engine.try_acquire() {
            Ok(control) => control,
            Err(err) => panic!("acquire: {err}"),
        };
        assert!(second.fire(Trigger::Start).is_ok());
        engine.release(&first);
        assert!(engine.is_busy());
    }
}
