//! The per-session worker thread.
//!
//! Steps are taken in order. A Find or Sequence step (or a wait action) is
//! the single *active* step and consumes lines until it settles. NotFind
//! steps that have been reached become *watchers*: they keep observing lines
//! while later steps run and pass once a later step settles, when their own
//! timeout expires, or when the session ends. Verdicts are buffered and
//! released strictly in step order; a step that becomes current is announced
//! with a `Running` update once every earlier step has been released.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tre_core::{
    FinishReason, LogLine, PayloadExtractor, StepEvaluator, StepKind, StepResult, StepSpec,
    StepStatus,
};

use crate::action::ActionRunner;
use crate::control::Control;
use crate::emit::Emitter;
use crate::engine::{SessionOptions, SessionOutcome};
use crate::lifecycle::{SessionState, Trigger};
use crate::transport::{Connector, Endpoint, LineStream, ReadOutcome};

struct Pending {
    pos: usize,
    evaluator: StepEvaluator,
    started: Instant,
    timeout: Option<Duration>,
}

impl Pending {
    fn expired(&self, now: Instant) -> Option<Duration> {
        self.timeout
            .filter(|limit| now.saturating_duration_since(self.started) >= *limit)
    }
}

enum Active {
    Match(Pending),
    Wait {
        pos: usize,
        result: StepResult,
        until: Instant,
        captured: Option<Vec<LogLine>>,
    },
}

struct Progress<'a> {
    steps: &'a [StepSpec],
    emitter: &'a Emitter,
    actions: &'a dyn ActionRunner,
    extractor: &'a PayloadExtractor,
    default_timeout: Option<Duration>,
    next: usize,
    active: Option<Active>,
    watchers: Vec<Pending>,
    settled: BTreeMap<usize, StepResult>,
    announced: BTreeMap<usize, StepResult>,
    released: usize,
    results: Vec<StepResult>,
    backlog: VecDeque<LogLine>,
}

impl<'a> Progress<'a> {
    fn is_complete(&self) -> bool {
        self.active.is_none() && self.watchers.is_empty() && self.next >= self.steps.len()
    }

    /// Reports `result` as the `Running` state of step `pos`, held back
    /// until the steps before it have been released.
    fn announce(&mut self, pos: usize, result: StepResult) {
        if pos == self.released {
            self.emitter.step_update(&result);
        } else {
            self.announced.insert(pos, result);
        }
    }

    fn record(&mut self, pos: usize, result: StepResult) {
        self.settled.insert(pos, result);
        while let Some(result) = self.settled.remove(&self.released) {
            self.emitter.step_update(&result);
            self.results.push(result);
            self.released += 1;
            if let Some(running) = self.announced.remove(&self.released) {
                self.emitter.step_update(&running);
            }
        }
    }

    /// Pushes timeout clocks forward by time spent outside `Running`.
    fn shift_deadlines(&mut self, paused: Duration) {
        if let Some(Active::Match(pending)) = &mut self.active {
            pending.started += paused;
        }
        for watcher in &mut self.watchers {
            watcher.started += paused;
        }
    }

    fn close_watchers(&mut self, reason: FinishReason) {
        for mut watcher in std::mem::take(&mut self.watchers) {
            let result = watcher.evaluator.finish(reason).clone();
            self.record(watcher.pos, result);
        }
    }

    fn pending(&self, pos: usize, step: &StepSpec, now: Instant) -> Pending {
        Pending {
            pos,
            evaluator: StepEvaluator::new(step),
            started: now,
            timeout: step.timeout.or(self.default_timeout),
        }
    }

    /// Takes steps until one needs lines or none are left. An `Err` carries
    /// the message of a step that cannot be evaluated at all.
    fn activate(&mut self, now: Instant) -> Result<(), String> {
        let steps = self.steps;
        while self.active.is_none() && self.next < steps.len() {
            let pos = self.next;
            let step = &steps[pos];
            self.next += 1;
            match &step.kind {
                StepKind::Action { kind, params } => {
                    self.close_watchers(FinishReason::Superseded);
                    match kind.as_str() {
                        "wait" | "wait_capture" => {
                            let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(0);
                            let mut result = StepResult::running(step);
                            result.matched_line = format!("[{kind} {ms}ms]");
                            self.announce(pos, result.clone());
                            self.active = Some(Active::Wait {
                                pos,
                                result,
                                until: now + Duration::from_millis(ms),
                                captured: (kind == "wait_capture").then(Vec::new),
                            });
                        }
                        _ => {
                            let outcome = self.actions.run(kind, params);
                            let mut result = StepResult::running(step);
                            result.status = if outcome.ok {
                                StepStatus::Pass
                            } else {
                                StepStatus::Fail
                            };
                            result.matched_line = outcome.message;
                            self.record(pos, result);
                        }
                    }
                }
                _ => {
                    let pending = self.pending(pos, step, now);
                    if pending.evaluator.is_settled() {
                        let result = pending.evaluator.result().clone();
                        let message = result
                            .detail
                            .error
                            .clone()
                            .unwrap_or_else(|| "step cannot be evaluated".to_string());
                        self.close_watchers(FinishReason::Superseded);
                        self.record(pos, result);
                        return Err(format!("step {}: {message}", step.index));
                    }
                    self.announce(pos, pending.evaluator.result().clone());
                    if step.is_not_find() {
                        self.watchers.push(pending);
                    } else {
                        self.active = Some(Active::Match(pending));
                    }
                }
            }
        }
        Ok(())
    }

    fn offer(&mut self, line: &LogLine, now: Instant) -> Result<(), String> {
        let extractor = self.extractor;
        let mut violated = Vec::new();
        self.watchers.retain_mut(|watcher| {
            match watcher.evaluator.feed(line, extractor) {
                Some(result) => {
                    violated.push((watcher.pos, result.clone()));
                    false
                }
                None => true,
            }
        });
        for (pos, result) in violated {
            self.record(pos, result);
        }

        let settled = match &mut self.active {
            None => None,
            Some(Active::Wait { captured, .. }) => {
                if let Some(captured) = captured {
                    captured.push(line.clone());
                }
                None
            }
            Some(Active::Match(pending)) => pending
                .evaluator
                .feed(line, extractor)
                .map(|result| (pending.pos, result.clone())),
        };
        if let Some((pos, result)) = settled {
            self.active = None;
            self.close_watchers(FinishReason::Superseded);
            self.record(pos, result);
            self.activate(now)?;
        }
        Ok(())
    }

    fn tick(&mut self, now: Instant, check_timeouts: bool) -> Result<(), String> {
        let wait_over = matches!(&self.active, Some(Active::Wait { until, .. }) if now >= *until);
        if wait_over {
            if let Some(Active::Wait {
                pos,
                mut result,
                captured,
                ..
            }) = self.active.take()
            {
                result.status = StepStatus::Pass;
                if let Some(captured) = captured {
                    result.detail.count = Some(captured.len());
                    self.backlog.extend(captured);
                }
                self.record(pos, result);
                self.activate(now)?;
            }
        }
        if !check_timeouts {
            return Ok(());
        }

        let mut expired = Vec::new();
        self.watchers.retain_mut(|watcher| match watcher.expired(now) {
            Some(limit) => {
                let result = watcher.evaluator.finish(FinishReason::TimedOut(limit)).clone();
                expired.push((watcher.pos, result));
                false
            }
            None => true,
        });
        for (pos, result) in expired {
            self.record(pos, result);
        }

        let timed_out = match &mut self.active {
            Some(Active::Match(pending)) => pending.expired(now).map(|limit| {
                (
                    pending.pos,
                    pending.evaluator.finish(FinishReason::TimedOut(limit)).clone(),
                )
            }),
            _ => None,
        };
        if let Some((pos, result)) = timed_out {
            self.active = None;
            self.close_watchers(FinishReason::Superseded);
            self.record(pos, result);
            self.activate(now)?;
        }
        Ok(())
    }

    /// Resolves everything still open after a stop request.
    fn finalize_stopped(&mut self) {
        self.close_watchers(FinishReason::Stopped);
        match self.active.take() {
            Some(Active::Match(mut pending)) => {
                let result = pending.evaluator.finish(FinishReason::Stopped).clone();
                self.record(pending.pos, result);
            }
            Some(Active::Wait {
                pos, mut result, ..
            }) => {
                result.status = StepStatus::Fail;
                result.detail.note = Some("[stopped: wait interrupted]".to_string());
                self.record(pos, result);
            }
            None => {}
        }
        let steps = self.steps;
        while self.next < steps.len() {
            let pos = self.next;
            let step = &steps[pos];
            self.next += 1;
            let result = if step.is_action() {
                let mut result = StepResult::running(step);
                result.status = StepStatus::Fail;
                result.detail.note = Some("[stopped: action not run]".to_string());
                result
            } else {
                StepEvaluator::new(step).finish(FinishReason::Stopped).clone()
            };
            self.record(pos, result);
        }
    }

    /// Resolves open steps after the line source went away. Returns whether
    /// a step was still waiting for lines.
    fn finalize_stream_end(&mut self, reason: &str) -> bool {
        self.close_watchers(FinishReason::StreamEnded);
        match self.active.take() {
            Some(Active::Match(mut pending)) => {
                let result = pending
                    .evaluator
                    .abort(format!("connection lost: {reason}"))
                    .clone();
                self.record(pending.pos, result);
                true
            }
            Some(Active::Wait {
                pos, mut result, ..
            }) => {
                result.status = StepStatus::Error;
                result.detail.error = Some(format!("connection lost: {reason}"));
                self.record(pos, result);
                true
            }
            None => self.next < self.steps.len(),
        }
    }
}

enum Exit {
    Completed,
    Stopped,
    StreamEnded(String),
    EvaluationFailed(String),
}

enum ConnectFailure {
    Stopped,
    Failed(String),
}

pub(crate) struct Worker {
    pub(crate) control: Arc<Control>,
    pub(crate) emitter: Arc<Emitter>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) actions: Arc<dyn ActionRunner>,
    pub(crate) endpoint: Endpoint,
    pub(crate) steps: Vec<StepSpec>,
    pub(crate) options: SessionOptions,
}

impl Worker {
    /// Runs the session; a panic inside it (a user action runner, a sink)
    /// still ends the session in `Error` so the engine slot is freed.
    pub(crate) fn run_guarded(self) -> SessionOutcome {
        let control = Arc::clone(&self.control);
        let emitter = Arc::clone(&self.emitter);
        match panic::catch_unwind(AssertUnwindSafe(move || self.run())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("session worker panicked: {message}");
                let state = control
                    .fire(Trigger::WorkerPanicked)
                    .unwrap_or_else(|_| control.state());
                emitter.status(&format!("Worker failed: {message}"));
                SessionOutcome {
                    state,
                    results: Vec::new(),
                    lines: control.stats(),
                }
            }
        }
    }

    fn run(self) -> SessionOutcome {
        self.emitter
            .status(&format!("Connecting to {}...", self.endpoint));
        let mut stream = match self.connect_with_retry(self.options.connect.attempts) {
            Ok(stream) => stream,
            Err(ConnectFailure::Stopped) => {
                let state = self.settle(Trigger::WorkerExited);
                self.emitter.status("Stopped.");
                return self.outcome(state, Vec::new());
            }
            Err(ConnectFailure::Failed(message)) => {
                let state = self.settle(Trigger::ConnectFailed);
                self.emitter.status(&format!(
                    "Failed to connect to {}: {message}",
                    self.endpoint
                ));
                return self.outcome(state, Vec::new());
            }
        };
        if self.control.fire(Trigger::Connected).is_err() {
            drop(stream);
            let state = self.settle(Trigger::WorkerExited);
            self.emitter.status("Stopped.");
            return self.outcome(state, Vec::new());
        }
        self.emitter
            .status(&format!("Connected to {}.", self.endpoint));
        let infos: Vec<_> = self.steps.iter().map(StepSpec::info).collect();
        self.emitter.steps_init(&infos);

        let mut progress = Progress {
            steps: &self.steps,
            emitter: &self.emitter,
            actions: self.actions.as_ref(),
            extractor: &self.options.extractor,
            default_timeout: self.options.default_step_timeout,
            next: 0,
            active: None,
            watchers: Vec::new(),
            settled: BTreeMap::new(),
            announced: BTreeMap::new(),
            released: 0,
            results: Vec::new(),
            backlog: VecDeque::new(),
        };
        let exit = self.drive(&mut stream, &mut progress);
        drop(stream);

        let exit = match exit {
            Exit::StreamEnded(_) | Exit::EvaluationFailed(_) if self.control.stop_requested() => {
                Exit::Stopped
            }
            other => other,
        };
        let (state, status) = match exit {
            Exit::Completed => (
                self.settle(Trigger::Completed),
                "All steps completed.".to_string(),
            ),
            Exit::Stopped => {
                progress.finalize_stopped();
                (self.settle(Trigger::WorkerExited), "Stopped.".to_string())
            }
            Exit::StreamEnded(reason) => {
                if progress.finalize_stream_end(&reason) {
                    (
                        self.settle(Trigger::StreamFailed),
                        format!("Connection lost: {reason}"),
                    )
                } else {
                    (
                        self.settle(Trigger::Completed),
                        "Stream ended; all steps resolved.".to_string(),
                    )
                }
            }
            Exit::EvaluationFailed(message) => (
                self.settle(Trigger::EvaluationFailed),
                format!("Evaluation error: {message}"),
            ),
        };
        let results = std::mem::take(&mut progress.results);
        self.emitter.status(&status);
        self.outcome(state, results)
    }

    fn drive(&self, stream: &mut Box<dyn LineStream>, progress: &mut Progress<'_>) -> Exit {
        if let Err(message) = progress.activate(Instant::now()) {
            return Exit::EvaluationFailed(message);
        }
        let mut line_no = 0usize;
        let mut reconnects = 0u32;
        let mut paused_since: Option<Instant> = None;
        loop {
            if progress.is_complete() {
                return Exit::Completed;
            }
            if self.control.stop_requested() {
                return Exit::Stopped;
            }
            let buffered = if self.control.is_paused() {
                None
            } else {
                progress.backlog.pop_front()
            };
            let line = match buffered {
                Some(line) => Some(line),
                None => match stream.next_line() {
                    ReadOutcome::Line(text) => {
                        line_no += 1;
                        self.control.count_received();
                        if self.control.is_paused() {
                            self.control.count_dropped();
                            None
                        } else {
                            self.control.count_evaluated();
                            Some(LogLine::new(line_no, text))
                        }
                    }
                    ReadOutcome::Idle => None,
                    outcome @ (ReadOutcome::Closed | ReadOutcome::Failed(_)) => {
                        let reason = match outcome {
                            ReadOutcome::Failed(message) => message,
                            _ => "closed by peer".to_string(),
                        };
                        if reconnects >= self.options.reconnect_attempts {
                            return Exit::StreamEnded(reason);
                        }
                        reconnects += 1;
                        tracing::warn!("stream from {} ended: {reason}", self.endpoint);
                        self.emitter.status(&format!(
                            "Reconnecting ({reconnects}/{})...",
                            self.options.reconnect_attempts
                        ));
                        self.sleep_unless_stopped(self.options.reconnect_delay);
                        match self.connect_with_retry(1) {
                            Ok(fresh) => {
                                *stream = fresh;
                                self.emitter
                                    .status(&format!("Reconnected to {}.", self.endpoint));
                            }
                            Err(ConnectFailure::Stopped) => return Exit::Stopped,
                            Err(ConnectFailure::Failed(_)) => {}
                        }
                        continue;
                    }
                },
            };
            let now = Instant::now();
            if let Some(line) = line {
                if let Err(message) = progress.offer(&line, now) {
                    return Exit::EvaluationFailed(message);
                }
            }
            let running = self.control.state() == SessionState::Running;
            match (running, paused_since) {
                (false, None) => paused_since = Some(now),
                (true, Some(since)) => {
                    progress.shift_deadlines(now.saturating_duration_since(since));
                    paused_since = None;
                }
                _ => {}
            }
            if let Err(message) = progress.tick(now, running) {
                return Exit::EvaluationFailed(message);
            }
        }
    }

    fn connect_with_retry(&self, attempts: u32) -> Result<Box<dyn LineStream>, ConnectFailure> {
        let attempts = attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            if self.control.stop_requested() {
                return Err(ConnectFailure::Stopped);
            }
            match self.connector.connect(&self.endpoint, &self.options.connect) {
                Ok(stream) => {
                    tracing::info!("connected to {} (attempt {attempt})", self.endpoint);
                    return Ok(stream);
                }
                Err(err) => {
                    tracing::warn!("connect attempt {attempt}/{attempts} failed: {err}");
                    last = err.to_string();
                }
            }
            if attempt < attempts {
                self.sleep_unless_stopped(self.options.connect.backoff(attempt));
            }
        }
        if self.control.stop_requested() {
            return Err(ConnectFailure::Stopped);
        }
        Err(ConnectFailure::Failed(last))
    }

    fn sleep_unless_stopped(&self, total: Duration) {
        let tick = self
            .options
            .connect
            .read_tick
            .max(Duration::from_millis(1));
        let deadline = Instant::now() + total;
        loop {
            if self.control.stop_requested() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(tick.min(deadline - now));
        }
    }

    /// Moves to the terminal state for `trigger`; a stop that raced in
    /// turns it into a plain worker exit.
    fn settle(&self, trigger: Trigger) -> SessionState {
        match self.control.fire(trigger) {
            Ok(state) => state,
            Err(_) => match self.control.fire(Trigger::WorkerExited) {
                Ok(state) => state,
                Err(_) => self.control.state(),
            },
        }
    }

    fn outcome(&self, state: SessionState, results: Vec<StepResult>) -> SessionOutcome {
        SessionOutcome {
            state,
            results,
            lines: self.control.stats(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| "unknown panic".to_string())
}
