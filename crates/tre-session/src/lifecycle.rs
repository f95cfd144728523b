//! Session lifecycle states and the triggers that move between them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Connecting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Start,
    Connected,
    ConnectFailed,
    Pause,
    Resume,
    StopRequested,
    /// Every step reached a verdict, or the stream ended with nothing pending.
    Completed,
    StreamFailed,
    EvaluationFailed,
    WorkerExited,
    /// The worker thread unwound; the session cannot continue.
    WorkerPanicked,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Connected => "connected",
            Self::ConnectFailed => "connect_failed",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::StopRequested => "stop",
            Self::Completed => "completed",
            Self::StreamFailed => "stream_failed",
            Self::EvaluationFailed => "evaluation_failed",
            Self::WorkerExited => "worker_exited",
            Self::WorkerPanicked => "worker_panicked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {trigger} while session is {from}")]
pub struct TransitionError {
    pub from: SessionState,
    pub trigger: Trigger,
}

/// Target state for `trigger` in `current`, or `None` when the trigger is
/// not allowed there.
pub fn next_state(current: SessionState, trigger: Trigger) -> Option<SessionState> {
    use SessionState::*;
    match (current, trigger) {
        (Idle, Trigger::Start) => Some(Connecting),
        (Connecting, Trigger::Connected) => Some(Running),
        (Connecting, Trigger::ConnectFailed) => Some(Error),
        (Running, Trigger::Pause) => Some(Paused),
        (Paused, Trigger::Resume) => Some(Running),
        (Connecting | Running | Paused, Trigger::StopRequested) => Some(Stopping),
        (Running | Paused | Stopping, Trigger::Completed) => Some(Stopped),
        (Running | Paused, Trigger::StreamFailed | Trigger::EvaluationFailed) => Some(Error),
        (Stopping, Trigger::WorkerExited) => Some(Stopped),
        (Connecting | Running | Paused | Stopping, Trigger::WorkerPanicked) => Some(Error),
        _ => None,
    }
}

pub fn apply(current: SessionState, trigger: Trigger) -> Result<SessionState, TransitionError> {
    next_state(current, trigger).ok_or(TransitionError {
        from: current,
        trigger,
    })
}
