//! Log verification core for the test run engine.
//!
//! A [`TestSuite`] is loaded from a JSON step document, each step is
//! evaluated against a sequence of [`LogLine`]s, and the results are
//! collected into a [`Report`]. The same incremental [`StepEvaluator`]
//! backs both the offline aggregator and the live session worker.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod extract;
pub mod log;
pub mod matcher;
pub mod model;
pub mod pattern;
pub mod report;
pub mod suite;

pub use aggregate::{replay, run};
pub use error::{LoadError, PatternError, RenderError};
pub use event::{ChannelEventSink, EventSink, InMemoryEventSink, NullEventSink, ProgressEvent};
pub use extract::{ExtractorConfig, PayloadExtractor, SplitMode};
pub use matcher::{evaluate, FinishReason, StepEvaluator};
pub use model::{
    LogLine, Report, StepDetail, StepInfo, StepKind, StepResult, StepSpec, StepStatus, Summary,
    TestSuite,
};
pub use pattern::{CompiledPattern, PatternSpec};

pub fn crate_label() -> &'static str {
    "tre-core"
}
