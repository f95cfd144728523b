use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tre_core::{EventSink, StepInfo, StepResult};

/// Serialises deliveries to a session's sink.
///
/// Calls made from inside a handler (the owning thread re-entering) are
/// delivered inline instead of waiting on the gate they already hold.
pub(crate) struct Emitter {
    sink: Arc<dyn EventSink>,
    gate: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Emitter {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            gate: Mutex::new(()),
            owner: Mutex::new(None),
        }
    }

    fn deliver(&self, f: impl FnOnce(&dyn EventSink)) {
        let me = thread::current().id();
        if *lock(&self.owner) == Some(me) {
            f(self.sink.as_ref());
            return;
        }
        let _turn = lock(&self.gate);
        *lock(&self.owner) = Some(me);
        f(self.sink.as_ref());
        *lock(&self.owner) = None;
    }

    pub(crate) fn status(&self, message: &str) {
        tracing::info!("{message}");
        self.deliver(|sink| sink.on_status(message));
    }

    pub(crate) fn steps_init(&self, steps: &[StepInfo]) {
        self.deliver(|sink| sink.on_steps_init(steps));
    }

    pub(crate) fn step_update(&self, result: &StepResult) {
        tracing::debug!(
            "step {} {:?}: {} {}",
            result.index,
            result.name,
            result.status,
            result.payload
        );
        self.deliver(|sink| sink.on_step_update(result));
    }
}
