use crate::lifecycle::{SessionState, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a session is already active on this engine ({0})")]
    AlreadyActive(SessionState),
    #[error("connect {endpoint}: {message}")]
    Connection { endpoint: String, message: String },
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("spawn session worker: {0}")]
    Spawn(#[source] std::io::Error),
}
