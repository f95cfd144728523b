use serde_json::{Map, Value};

/// Result of running one action step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub ok: bool,
    pub message: String,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Performs action steps (taps, screenshots, ...) against the device under
/// test. `wait` and `wait_capture` are handled by the session itself and
/// never reach the runner.
pub trait ActionRunner: Send + Sync {
    fn run(&self, kind: &str, params: &Map<String, Value>) -> ActionOutcome;
}

/// Treats every action as an accepted marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerActions;

impl ActionRunner for MarkerActions {
    fn run(&self, kind: &str, _params: &Map<String, Value>) -> ActionOutcome {
        ActionOutcome::ok(format!("[action] {kind}"))
    }
}
