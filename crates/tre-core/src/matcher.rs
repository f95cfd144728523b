//! Step evaluation.
//!
//! [`StepEvaluator`] consumes lines one at a time and settles on a verdict
//! either when a line decides it or when the caller finishes it. Offline
//! evaluation is simply "feed every line, then finish at end of log", so the
//! live session and the report aggregator share one set of semantics.

use std::time::Duration;

use crate::extract::PayloadExtractor;
use crate::model::{LogLine, StepDetail, StepKind, StepResult, StepSpec, StepStatus};
use crate::pattern::CompiledPattern;

/// Why an unresolved step is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EndOfLog,
    /// A later step reached its verdict while this one was still watching.
    Superseded,
    Stopped,
    StreamEnded,
    TimedOut(Duration),
}

impl FinishReason {
    fn note(self, seen: bool) -> Option<String> {
        let what = if seen {
            "pattern not seen"
        } else {
            "pattern never seen"
        };
        match self {
            Self::EndOfLog | Self::Superseded => None,
            Self::Stopped => Some(format!("[stopped: {what}]")),
            Self::StreamEnded => Some(format!("[stream ended: {what}]")),
            Self::TimedOut(after) => Some(format!("[timeout {}s: {what}]", after.as_secs_f64())),
        }
    }
}

#[derive(Debug, Clone)]
struct Hit {
    index: usize,
    text: String,
    capture: Option<String>,
}

#[derive(Debug, Clone)]
enum Tracker {
    Find {
        pattern: CompiledPattern,
        min_count: usize,
        count: usize,
        first: Option<Hit>,
    },
    NotFind {
        pattern: CompiledPattern,
    },
    Sequence {
        patterns: Vec<CompiledPattern>,
        matched: usize,
        cursor: usize,
    },
    Settled,
}

#[derive(Debug, Clone)]
pub struct StepEvaluator {
    tracker: Tracker,
    result: StepResult,
}

impl StepEvaluator {
    /// Prepares a step for evaluation. Invalid steps and patterns that fail
    /// to compile settle immediately as `Error`; actions settle as `Pass`.
    pub fn new(step: &StepSpec) -> Self {
        let mut result = StepResult::running(step);
        let compiled = match &step.kind {
            StepKind::Find { pattern, min_count } => pattern.compile().map(|pattern| Tracker::Find {
                pattern,
                min_count: (*min_count).max(1),
                count: 0,
                first: None,
            }),
            StepKind::NotFind { pattern } => {
                pattern.compile().map(|pattern| Tracker::NotFind { pattern })
            }
            StepKind::Sequence { patterns } => patterns
                .iter()
                .map(|p| p.compile())
                .collect::<Result<Vec<_>, _>>()
                .map(|patterns| Tracker::Sequence {
                    patterns,
                    matched: 0,
                    cursor: 0,
                }),
            StepKind::Action { kind, .. } => {
                result.status = StepStatus::Pass;
                result.matched_line = format!("[action] {kind}");
                Ok(Tracker::Settled)
            }
            StepKind::Invalid { reason } => {
                result.status = StepStatus::Error;
                result.detail.error = Some(reason.clone());
                Ok(Tracker::Settled)
            }
        };
        let tracker = match compiled {
            Ok(tracker) => tracker,
            Err(err) => {
                result.status = StepStatus::Error;
                result.detail.error = Some(err.to_string());
                Tracker::Settled
            }
        };
        Self { tracker, result }
    }

    pub fn index(&self) -> usize {
        self.result.index
    }

    pub fn is_settled(&self) -> bool {
        self.result.is_terminal()
    }

    /// Current result; `Running` until the step settles.
    pub fn result(&self) -> &StepResult {
        &self.result
    }

    /// Offers one line. Returns the verdict when this line settles the step.
    pub fn feed(&mut self, line: &LogLine, extractor: &PayloadExtractor) -> Option<&StepResult> {
        let settled = match &mut self.tracker {
            Tracker::Settled => return None,
            Tracker::Find {
                pattern,
                min_count,
                count,
                first,
            } => {
                if !pattern.is_match(&line.text) {
                    return None;
                }
                *count += 1;
                if first.is_none() {
                    *first = Some(Hit {
                        index: line.index,
                        text: line.text.clone(),
                        capture: pattern.capture(&line.text),
                    });
                }
                if *count < *min_count {
                    return None;
                }
                let hit = first.clone();
                let count = *count;
                self.result.detail.count = Some(count);
                (StepStatus::Pass, hit)
            }
            Tracker::NotFind { pattern } => {
                if !pattern.is_match(&line.text) {
                    return None;
                }
                let hit = Hit {
                    index: line.index,
                    text: line.text.clone(),
                    capture: pattern.capture(&line.text),
                };
                (StepStatus::Fail, Some(hit))
            }
            Tracker::Sequence {
                patterns,
                matched,
                cursor,
            } => {
                let Some(next) = patterns.get(*matched) else {
                    return None;
                };
                if !next.is_match(&line.text) {
                    return None;
                }
                let capture = next.capture(&line.text);
                *matched += 1;
                *cursor = line.index;
                if *matched < patterns.len() {
                    return None;
                }
                self.result.detail.progress = Some(*matched);
                let hit = Hit {
                    index: line.index,
                    text: line.text.clone(),
                    capture,
                };
                (StepStatus::Pass, Some(hit))
            }
        };
        let (status, hit) = settled;
        self.settle(status, hit, extractor);
        Some(&self.result)
    }

    /// Closes the step without further lines. Already settled steps keep
    /// their verdict.
    pub fn finish(&mut self, reason: FinishReason) -> &StepResult {
        let tracker = std::mem::replace(&mut self.tracker, Tracker::Settled);
        match tracker {
            Tracker::Settled => {}
            Tracker::Find {
                min_count, count, ..
            } => {
                self.result.status = StepStatus::Fail;
                self.result.detail.count = Some(count);
                self.result.detail.note = reason.note(false).or_else(|| {
                    (count > 0).then(|| format!("seen {count} of {min_count} required"))
                });
            }
            Tracker::NotFind { .. } => {
                self.result.status = StepStatus::Pass;
                self.result.detail.note = reason.note(true);
            }
            Tracker::Sequence {
                patterns,
                matched,
                cursor,
            } => {
                self.result.status = StepStatus::Fail;
                self.result.detail.progress = Some(matched);
                self.result.detail.cursor = Some(cursor);
                self.result.detail.unmatched =
                    patterns.get(matched).map(|p| p.spec().pattern.clone());
                self.result.detail.note = reason.note(false);
            }
        }
        &self.result
    }

    /// Settles an unresolved step as `Error`, e.g. when its line source fails.
    pub fn abort(&mut self, message: impl Into<String>) -> &StepResult {
        if !self.is_settled() {
            self.tracker = Tracker::Settled;
            self.result.status = StepStatus::Error;
            self.result.detail.error = Some(message.into());
        }
        &self.result
    }

    fn settle(&mut self, status: StepStatus, hit: Option<Hit>, extractor: &PayloadExtractor) {
        self.tracker = Tracker::Settled;
        self.result.status = status;
        if let Some(hit) = hit {
            self.result.payload = extractor.extract(&hit.text);
            self.result.matched_line = hit.text;
            self.result.detail = StepDetail {
                line_index: Some(hit.index),
                capture: hit.capture,
                ..std::mem::take(&mut self.result.detail)
            };
        }
    }
}

/// Evaluates one step against a complete log.
pub fn evaluate(step: &StepSpec, lines: &[LogLine], extractor: &PayloadExtractor) -> StepResult {
    let mut evaluator = StepEvaluator::new(step);
    for line in lines {
        if evaluator.is_settled() {
            break;
        }
        evaluator.feed(line, extractor);
    }
    evaluator.finish(FinishReason::EndOfLog).clone()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{evaluate, FinishReason, StepEvaluator};
    use crate::extract::PayloadExtractor;
    use crate::model::{LogLine, StepKind, StepSpec, StepStatus};
    use crate::pattern::PatternSpec;

    fn find(pattern: &str, min_count: usize) -> StepSpec {
        StepSpec::new(
            1,
            "find",
            StepKind::Find {
                pattern: PatternSpec::regex(pattern),
                min_count,
            },
        )
    }

    fn not_find(pattern: &str) -> StepSpec {
        StepSpec::new(
            1,
            "not_find",
            StepKind::NotFind {
                pattern: PatternSpec::regex(pattern),
            },
        )
    }

    fn sequence(patterns: &[&str]) -> StepSpec {
        StepSpec::new(
            1,
            "seq",
            StepKind::Sequence {
                patterns: patterns.iter().map(|p| PatternSpec::regex(*p)).collect(),
            },
        )
    }

    fn log(lines: &[&str]) -> Vec<LogLine> {
        LogLine::numbered(lines.iter().copied())
    }

    #[test]
    fn find_reports_first_matching_line() {
        let lines = log(&["boot", "READY one", "READY two"]);
        let result = evaluate(&find("READY", 1), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.matched_line, "READY one");
        assert_eq!(result.detail.line_index, Some(2));
    }

    #[test]
    fn find_on_empty_log_fails() {
        let result = evaluate(&find("READY", 1), &[], &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Fail);
        assert!(result.matched_line.is_empty());
    }

    #[test]
    fn find_min_count_needs_enough_matches() {
        let lines = log(&["tick", "tick", "tock"]);
        let pass = evaluate(&find("tick", 2), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(pass.status, StepStatus::Pass);
        assert_eq!(pass.detail.count, Some(2));
        assert_eq!(pass.detail.line_index, Some(1));

        let fail = evaluate(&find("tick", 3), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(fail.status, StepStatus::Fail);
        assert_eq!(fail.detail.count, Some(2));
        assert_eq!(fail.detail.note.as_deref(), Some("seen 2 of 3 required"));
    }

    #[test]
    fn not_find_fails_on_first_offending_line() {
        let lines = log(&["ok", "panic: a", "panic: b"]);
        let result = evaluate(&not_find("panic"), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.detail.line_index, Some(2));
        assert_eq!(result.matched_line, "panic: a");
    }

    #[test]
    fn not_find_on_empty_log_passes() {
        let result = evaluate(&not_find("panic"), &[], &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Pass);
    }

    #[test]
    fn sequence_uses_earliest_strictly_increasing_chain() {
        let lines = log(&["A", "B", "A", "B"]);
        let result = evaluate(&sequence(&["A", "B"]), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.detail.line_index, Some(2));
        assert_eq!(result.detail.progress, Some(2));
    }

    #[test]
    fn sequence_does_not_reuse_a_line() {
        let lines = log(&["A B"]);
        let result = evaluate(&sequence(&["A", "B"]), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.detail.unmatched.as_deref(), Some("B"));
        assert_eq!(result.detail.cursor, Some(1));
    }

    #[test]
    fn sequence_out_of_order_names_missing_element() {
        let lines = log(&["B", "A"]);
        let result = evaluate(&sequence(&["A", "B"]), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Fail);
        assert_eq!(result.detail.progress, Some(1));
        assert_eq!(result.detail.unmatched.as_deref(), Some("B"));
        assert_eq!(result.detail.cursor, Some(2));
    }

    #[test]
    fn bad_pattern_is_error_not_fail() {
        let result = evaluate(&find("([", 1), &log(&["(["]), &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Error);
        assert!(result.detail.error.is_some());
    }

    #[test]
    fn action_passes_without_consulting_lines() {
        let step = StepSpec::new(
            1,
            "tap",
            StepKind::Action {
                kind: "tap".to_string(),
                params: serde_json::Map::new(),
            },
        );
        let result = evaluate(&step, &[], &PayloadExtractor::Heuristic);
        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(result.matched_line, "[action] tap");
    }

    #[test]
    fn payload_and_capture_are_recorded() {
        let lines = log(&["[ECU APP] speed=88"]);
        let result = evaluate(&find(r"speed=(\d+)", 1), &lines, &PayloadExtractor::Heuristic);
        assert_eq!(result.payload, "speed=88");
        assert_eq!(result.detail.capture.as_deref(), Some("88"));
    }

    #[test]
    fn timeout_finish_notes_reason() {
        let mut evaluator = StepEvaluator::new(&not_find("panic"));
        let result = evaluator.finish(FinishReason::TimedOut(Duration::from_secs(5)));
        assert_eq!(result.status, StepStatus::Pass);
        assert_eq!(
            result.detail.note.as_deref(),
            Some("[timeout 5s: pattern not seen]")
        );
    }

    #[test]
    fn abort_only_touches_unsettled_steps() {
        let mut evaluator = StepEvaluator::new(&find("x", 1));
        assert!(evaluator
            .feed(&LogLine::new(1, "x"), &PayloadExtractor::Heuristic)
            .is_some());
        assert_eq!(evaluator.abort("lost").status, StepStatus::Pass);

        let mut pending = StepEvaluator::new(&find("x", 1));
        assert_eq!(pending.abort("lost").status, StepStatus::Error);
    }

    const LOGS: [&[&str]; 6] = [
        &[],
        &["A"],
        &["B", "A"],
        &["A", "x", "B", "A", "C"],
        &["C B A", "A", "AB", "B", "C"],
        &["panic", "boot", "A1", "B2", "A3", "B4"],
    ];

    const PATTERNS: [&str; 5] = ["A", "B", r"[A-C]\d", "^C", "panic"];

    /// Earliest last line of any strictly increasing chain matching
    /// `patterns` in order, by exhaustive search.
    fn earliest_chain_end(patterns: &[regex::Regex], lines: &[&str], from: usize) -> Option<usize> {
        let (first, rest) = patterns.split_first()?;
        (from..lines.len())
            .filter(|idx| first.is_match(lines[*idx]))
            .filter_map(|idx| {
                if rest.is_empty() {
                    Some(idx + 1)
                } else {
                    earliest_chain_end(rest, lines, idx + 1)
                }
            })
            .min()
    }

    #[test]
    fn not_find_is_the_complement_of_find() {
        for lines in LOGS {
            let numbered = log(lines);
            for pattern in PATTERNS {
                let found = evaluate(&find(pattern, 1), &numbered, &PayloadExtractor::Heuristic);
                let absent =
                    evaluate(&not_find(pattern), &numbered, &PayloadExtractor::Heuristic);
                assert_eq!(
                    found.status == StepStatus::Pass,
                    absent.status == StepStatus::Fail,
                    "{pattern:?} over {lines:?}"
                );
                assert_eq!(found.detail.line_index, absent.detail.line_index);
            }
        }
    }

    #[test]
    fn sequence_agrees_with_exhaustive_chain_search() {
        let chains: [&[&str]; 6] = [
            &["A"],
            &["A", "B"],
            &["B", "A"],
            &["A", "B", "C"],
            &["A", "A"],
            &[r"[A-C]\d", r"[A-C]\d", "B"],
        ];
        for lines in LOGS {
            let numbered = log(lines);
            for chain in chains {
                let compiled: Vec<regex::Regex> = chain
                    .iter()
                    .map(|p| match regex::Regex::new(p) {
                        Ok(regex) => regex,
                        Err(err) => panic!("regex {p:?}: {err}"),
                    })
                    .collect();
                let expected = earliest_chain_end(&compiled, lines, 0);
                let result = evaluate(&sequence(chain), &numbered, &PayloadExtractor::Heuristic);
                let status = if expected.is_some() {
                    StepStatus::Pass
                } else {
                    StepStatus::Fail
                };
                assert_eq!(result.status, status, "{chain:?} over {lines:?}");
                if expected.is_some() {
                    assert_eq!(result.detail.line_index, expected, "{chain:?} over {lines:?}");
                }
            }
        }
    }
}
