//! Live sessions: a single worker thread per session reads a line stream,
//! drives the step evaluators and reports progress to an
//! [`tre_core::EventSink`]. An [`Engine`] admits at most one live session.

pub mod action;
pub mod control;
mod emit;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod transport;
mod worker;

pub use action::{ActionOutcome, ActionRunner, MarkerActions};
pub use control::{Control, LineStats};
pub use engine::{Engine, SessionHandle, SessionOptions, SessionOutcome};
pub use error::SessionError;
pub use lifecycle::{next_state, SessionState, TransitionError, Trigger};
pub use transport::{
    ChannelConnector, ConnectOptions, Connector, Endpoint, LineStream, ReadOutcome, TcpConnector,
};
