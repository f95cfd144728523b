//! Progress notifications for offline replays and live sessions.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::model::{StepInfo, StepResult};

/// Receiver of run progress.
///
/// Deliveries for one run never overlap, but they may come from a worker
/// thread rather than the thread that started the run.
pub trait EventSink: Send + Sync {
    fn on_status(&self, message: &str);
    fn on_steps_init(&self, steps: &[StepInfo]);
    fn on_step_update(&self, update: &StepResult);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Status(String),
    StepsInit(Vec<StepInfo>),
    StepUpdate(StepResult),
}

/// In-memory event sink for testing.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::Status(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<StepResult> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::StepUpdate(update) => Some(update),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn on_status(&self, message: &str) {
        self.push(ProgressEvent::Status(message.to_string()));
    }

    fn on_steps_init(&self, steps: &[StepInfo]) {
        self.push(ProgressEvent::StepsInit(steps.to_vec()));
    }

    fn on_step_update(&self, update: &StepResult) {
        self.push(ProgressEvent::StepUpdate(update.clone()));
    }
}

/// Forwards events into a channel so a consumer can drain them on its own
/// schedule. Events sent after the receiver is gone are discarded.
pub struct ChannelEventSink {
    tx: Mutex<Sender<ProgressEvent>>,
}

impl ChannelEventSink {
    pub fn new(tx: Sender<ProgressEvent>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    fn send(&self, event: ProgressEvent) {
        let Ok(tx) = self.tx.lock() else {
            return;
        };
        let _ = tx.send(event);
    }
}

impl EventSink for ChannelEventSink {
    fn on_status(&self, message: &str) {
        self.send(ProgressEvent::Status(message.to_string()));
    }

    fn on_steps_init(&self, steps: &[StepInfo]) {
        self.send(ProgressEvent::StepsInit(steps.to_vec()));
    }

    fn on_step_update(&self, update: &StepResult) {
        self.send(ProgressEvent::StepUpdate(update.clone()));
    }
}

/// No-op event sink that discards all events.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_status(&self, _message: &str) {}
    fn on_steps_init(&self, _steps: &[StepInfo]) {}
    fn on_step_update(&self, _update: &StepResult) {}
}
