use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pattern::PatternSpec;

/// One log line with its 1-based position in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub index: usize,
    pub text: String,
}

impl LogLine {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }

    /// Numbers a sequence of raw lines starting at 1.
    pub fn numbered<I, S>(lines: I) -> Vec<LogLine>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lines
            .into_iter()
            .enumerate()
            .map(|(idx, text)| LogLine::new(idx + 1, text))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Find {
        pattern: PatternSpec,
        min_count: usize,
    },
    NotFind {
        pattern: PatternSpec,
    },
    Sequence {
        patterns: Vec<PatternSpec>,
    },
    Action {
        kind: String,
        params: Map<String, Value>,
    },
    /// A step entry that could not be understood at load time.
    Invalid {
        reason: String,
    },
}

impl StepKind {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Find { .. } => "find",
            Self::NotFind { .. } => "not_find",
            Self::Sequence { .. } => "sequence",
            Self::Action { .. } => "action",
            Self::Invalid { .. } => "invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub index: usize,
    pub name: String,
    pub timeout: Option<Duration>,
    pub kind: StepKind,
}

impl StepSpec {
    pub fn new(index: usize, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            index,
            name: name.into(),
            timeout: None,
            kind,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_not_find(&self) -> bool {
        matches!(self.kind, StepKind::NotFind { .. })
    }

    pub fn is_action(&self) -> bool {
        matches!(self.kind, StepKind::Action { .. })
    }

    /// Short human description of what the step checks.
    pub fn descriptor(&self) -> String {
        match &self.kind {
            StepKind::Find { pattern, min_count } if *min_count > 1 => {
                format!("{pattern} (x{min_count})")
            }
            StepKind::Find { pattern, .. } => pattern.to_string(),
            StepKind::NotFind { pattern } => format!("NOT {pattern}"),
            StepKind::Sequence { patterns } => patterns
                .iter()
                .map(|p| p.pattern.as_str())
                .collect::<Vec<_>>()
                .join(" -> "),
            StepKind::Action { kind, params } => match params.get("ms").and_then(Value::as_u64) {
                Some(ms) if kind.starts_with("wait") => format!("[{kind} {ms}ms]"),
                _ => format!("[{kind}]"),
            },
            StepKind::Invalid { .. } => "[invalid]".to_string(),
        }
    }

    pub fn info(&self) -> StepInfo {
        StepInfo {
            index: self.index,
            name: self.name.clone(),
            descriptor: self.descriptor(),
        }
    }
}

/// Identity of a step as announced before any verdicts arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub index: usize,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    pub steps: Vec<StepSpec>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Flattens several suites into the step list of one run. Steps are
    /// numbered by their position in the concatenation.
    pub fn concat(name: impl Into<String>, suites: &[TestSuite]) -> Self {
        let steps = suites
            .iter()
            .flat_map(|suite| suite.steps.iter().cloned())
            .enumerate()
            .map(|(idx, mut step)| {
                step.index = idx + 1;
                step
            })
            .collect();
        Self::new(name, steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&StepSpec> {
        self.steps.iter().find(|step| step.index == index)
    }

    pub fn infos(&self) -> Vec<StepInfo> {
        self.steps.iter().map(StepSpec::info).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Running,
    Pass,
    Fail,
    Error,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unmatched: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub descriptor: String,
    pub status: StepStatus,
    #[serde(default)]
    pub matched_line: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub detail: StepDetail,
}

impl StepResult {
    pub fn running(step: &StepSpec) -> Self {
        Self {
            index: step.index,
            name: step.name.clone(),
            descriptor: step.descriptor(),
            status: StepStatus::Running,
            matched_line: String::new(),
            payload: String::new(),
            detail: StepDetail::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub all_passed: bool,
}

impl Summary {
    pub fn from_results(results: &[StepResult]) -> Self {
        let mut summary = Summary {
            total: results.len(),
            ..Summary::default()
        };
        for result in results {
            match result.status {
                StepStatus::Pass => summary.passed += 1,
                StepStatus::Fail => summary.failed += 1,
                StepStatus::Error => summary.errors += 1,
                StepStatus::Running => {}
            }
        }
        summary.all_passed = summary.failed == 0 && summary.errors == 0;
        summary
    }
}

/// Outcome of evaluating one suite against one log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub source: String,
    pub suite: String,
    pub generated_at: DateTime<Utc>,
    pub summary: Summary,
    pub results: Vec<StepResult>,
}

impl Report {
    pub fn new(source: impl Into<String>, suite: impl Into<String>, results: Vec<StepResult>) -> Self {
        Self {
            source: source.into(),
            suite: suite.into(),
            generated_at: Utc::now(),
            summary: Summary::from_results(&results),
            results,
        }
    }

    pub fn passed(&self) -> bool {
        self.summary.all_passed
    }
}
