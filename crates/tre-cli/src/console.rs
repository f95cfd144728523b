//! Plain-text rendering of progress events for the terminal.

use std::io::Write;

use tre_core::{ProgressEvent, StepResult, StepStatus, Summary};

pub fn write_event(out: &mut dyn Write, event: &ProgressEvent) -> std::io::Result<()> {
    match event {
        ProgressEvent::Status(message) => writeln!(out, "== {message}"),
        ProgressEvent::StepsInit(steps) => {
            writeln!(out, "{} step(s):", steps.len())?;
            for step in steps {
                writeln!(out, "  {:>3}. {} [{}]", step.index, step.name, step.descriptor)?;
            }
            Ok(())
        }
        ProgressEvent::StepUpdate(result) => writeln!(out, "{}", format_result(result)),
    }
}

pub fn format_result(result: &StepResult) -> String {
    let mut line = format!("{:>3} {:<5} {}", result.index, status_label(result.status), result.name);
    if let Some(index) = result.detail.line_index {
        line.push_str(&format!(" (line {index})"));
    }
    if !result.payload.is_empty() {
        line.push_str(&format!(" | {}", result.payload));
    } else if !result.matched_line.is_empty() {
        line.push_str(&format!(" | {}", result.matched_line));
    }
    if let Some(unmatched) = &result.detail.unmatched {
        line.push_str(&format!(" | stuck at {unmatched:?}"));
    }
    if let Some(error) = &result.detail.error {
        line.push_str(&format!(" | error: {error}"));
    }
    if let Some(note) = &result.detail.note {
        line.push_str(&format!(" {note}"));
    }
    line
}

fn status_label(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Running => "..",
        other => other.as_str(),
    }
}

pub fn summary_line(summary: &Summary) -> String {
    format!(
        "{} step(s): {} passed, {} failed, {} error(s)",
        summary.total, summary.passed, summary.failed, summary.errors
    )
}

#[cfg(test)]
mod tests {
    use tre_core::{ProgressEvent, StepDetail, StepInfo, StepResult, StepStatus};

    use super::{format_result, write_event};

    fn result(status: StepStatus) -> StepResult {
        StepResult {
            index: 2,
            name: "sensor".to_string(),
            descriptor: "sensor timeout".to_string(),
            status,
            matched_line: String::new(),
            payload: String::new(),
            detail: StepDetail::default(),
        }
    }

    #[test]
    fn pass_shows_line_and_payload() {
        let mut r = result(StepStatus::Pass);
        r.payload = "sensor timeout".to_string();
        r.detail.line_index = Some(7);
        assert_eq!(format_result(&r), "  2 PASS  sensor (line 7) | sensor timeout");
    }

    #[test]
    fn error_and_note_are_appended() {
        let mut r = result(StepStatus::Error);
        r.detail.error = Some("regex parse error".to_string());
        assert!(format_result(&r).ends_with("| error: regex parse error"));

        let mut r = result(StepStatus::Fail);
        r.detail.note = Some("[stopped: pattern never seen]".to_string());
        assert!(format_result(&r).ends_with(" [stopped: pattern never seen]"));
    }

    #[test]
    fn steps_init_lists_every_step() {
        let mut out = Vec::new();
        let event = ProgressEvent::StepsInit(vec![StepInfo {
            index: 1,
            name: "boot".to_string(),
            descriptor: "boot complete".to_string(),
        }]);
        if let Err(err) = write_event(&mut out, &event) {
            panic!("write: {err}");
        }
        assert_eq!(
            String::from_utf8_lossy(&out),
            "1 step(s):\n    1. boot [boot complete]\n"
        );
    }
}
