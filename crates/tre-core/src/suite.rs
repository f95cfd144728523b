//! Step document loading.
//!
//! A suite document is a JSON list; each element is one step recognised by
//! which of `find`, `not_find`, `sequence` or `action` it carries. Elements
//! that cannot be understood are kept in place as `StepKind::Invalid` so that
//! numbering stays stable and the rest of the suite still loads.

use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::LoadError;
use crate::model::{StepKind, StepSpec, TestSuite};
use crate::pattern::PatternSpec;

const MODE_KEYS: [&str; 4] = ["find", "not_find", "sequence", "action"];

pub fn load_file(path: &Path) -> Result<TestSuite, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text, &suite_name(path))
}

/// Suite name derived from a file path (file stem).
pub fn suite_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn parse(document: &str, name: &str) -> Result<TestSuite, LoadError> {
    let value: Value = serde_json::from_str(document).map_err(|err| LoadError::Json {
        name: name.to_string(),
        message: err.to_string(),
    })?;
    let Value::Array(items) = value else {
        return Err(LoadError::NotAList {
            name: name.to_string(),
        });
    };
    let steps = items
        .iter()
        .enumerate()
        .map(|(idx, item)| parse_step(idx + 1, item))
        .collect();
    Ok(TestSuite::new(name, steps))
}

/// Load-time problems of a suite as `Step <n> (<name>): <reason>` lines.
pub fn validate(suite: &TestSuite) -> Vec<String> {
    suite
        .steps
        .iter()
        .filter_map(|step| match &step.kind {
            StepKind::Invalid { reason } => {
                Some(format!("Step {} ({}): {reason}", step.index, step.name))
            }
            _ => None,
        })
        .collect()
}

fn default_name(index: usize) -> String {
    format!("Step {index}")
}

fn parse_step(index: usize, item: &Value) -> StepSpec {
    let Value::Object(obj) = item else {
        return StepSpec::new(
            index,
            default_name(index),
            StepKind::Invalid {
                reason: "must be an object".to_string(),
            },
        );
    };
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_name(index));

    let (kind, timeout) = match (parse_kind(obj), parse_timeout(obj)) {
        (Ok(kind), Ok(timeout)) => (kind, timeout),
        (Err(reason), _) | (_, Err(reason)) => (StepKind::Invalid { reason }, None),
    };
    StepSpec {
        index,
        name,
        timeout,
        kind,
    }
}

fn parse_kind(obj: &Map<String, Value>) -> Result<StepKind, String> {
    let modes: Vec<&str> = MODE_KEYS
        .iter()
        .copied()
        .filter(|key| obj.contains_key(*key))
        .collect();
    let mode = match modes.as_slice() {
        [] => return Err("missing one of find/not_find/sequence/action".to_string()),
        [mode] => *mode,
        many => return Err(format!("multiple modes present ({})", many.join(", "))),
    };
    let step_literal = obj.get("literal").and_then(Value::as_bool).unwrap_or(false);

    match mode {
        "find" => {
            let body = obj.get("find").and_then(Value::as_object).ok_or_else(|| {
                "find must be an object with 'pattern'".to_string()
            })?;
            let pattern = parse_pattern_object(body, step_literal)
                .ok_or_else(|| "find must be an object with 'pattern'".to_string())?;
            let min_count = match body.get("min_count") {
                None | Some(Value::Null) => 1,
                Some(value) => match value.as_u64() {
                    Some(n) if n >= 1 => n as usize,
                    _ => return Err("find.min_count must be a positive integer".to_string()),
                },
            };
            Ok(StepKind::Find { pattern, min_count })
        }
        "not_find" => {
            let pattern = obj
                .get("not_find")
                .and_then(Value::as_object)
                .and_then(|body| parse_pattern_object(body, step_literal))
                .ok_or_else(|| "not_find must be an object with 'pattern'".to_string())?;
            Ok(StepKind::NotFind { pattern })
        }
        "sequence" => {
            let elements = match obj.get("sequence") {
                Some(Value::Array(items)) => items,
                Some(Value::Object(body)) => match body.get("patterns") {
                    Some(Value::Array(items)) => items,
                    _ => return Err("sequence.patterns must be a list".to_string()),
                },
                _ => return Err("sequence must be a list".to_string()),
            };
            if elements.is_empty() {
                return Err("sequence must not be empty".to_string());
            }
            let patterns = elements
                .iter()
                .enumerate()
                .map(|(idx, el)| match el {
                    Value::String(text) => Ok(PatternSpec {
                        literal: step_literal,
                        ..PatternSpec::regex(text.clone())
                    }),
                    Value::Object(body) => parse_pattern_object(body, step_literal)
                        .ok_or_else(|| format!("seq[{}]: object needs 'pattern'", idx + 1)),
                    _ => Err(format!("seq[{}]: must be string or object", idx + 1)),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(StepKind::Sequence { patterns })
        }
        _ => {
            let body = obj
                .get("action")
                .and_then(Value::as_object)
                .ok_or_else(|| "action must be an object with 'type'".to_string())?;
            let kind = body
                .get("type")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| "action.type must be a non-empty string".to_string())?;
            let mut params = body.clone();
            params.remove("type");
            Ok(StepKind::Action {
                kind: kind.to_string(),
                params,
            })
        }
    }
}

fn parse_pattern_object(body: &Map<String, Value>, default_literal: bool) -> Option<PatternSpec> {
    let pattern = body.get("pattern").and_then(Value::as_str)?;
    let flag = |key: &str| body.get(key).and_then(Value::as_bool);
    let header = |key: &str| match body.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    };
    Some(PatternSpec {
        pattern: pattern.to_string(),
        literal: flag("literal").unwrap_or(default_literal),
        ignore_case: flag("ignore_case").unwrap_or(false),
        equals: flag("equals").unwrap_or(false),
        ecu: header("ecu"),
        app: header("app"),
        ctx: header("ctx"),
    })
}

/// Positive, finite seconds that fit a [`Duration`]; `None` otherwise.
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    if secs <= 0.0 || !secs.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

fn parse_timeout(obj: &Map<String, Value>) -> Result<Option<Duration>, String> {
    match obj.get("timeout") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .and_then(timeout_from_secs)
            .map(Some)
            .ok_or_else(|| "timeout must be a positive number of seconds".to_string()),
    }
}
