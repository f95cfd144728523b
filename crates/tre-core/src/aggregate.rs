use crate::event::EventSink;
use crate::extract::PayloadExtractor;
use crate::matcher::evaluate;
use crate::model::{LogLine, Report, TestSuite};

/// Evaluates every step of `suite` against the whole of `lines`.
///
/// Steps are independent: each one sees the complete log regardless of what
/// earlier steps matched, so re-running with the same inputs yields the same
/// results.
pub fn run(
    suite: &TestSuite,
    source: &str,
    lines: &[LogLine],
    extractor: &PayloadExtractor,
) -> Report {
    let results: Vec<_> = suite
        .steps
        .iter()
        .map(|step| {
            let result = evaluate(step, lines, extractor);
            tracing::debug!(
                "step {} {:?}: {}",
                result.index,
                result.name,
                result.status
            );
            result
        })
        .collect();
    let report = Report::new(source, suite.name.clone(), results);
    tracing::info!(
        "suite {} on {}: {} passed, {} failed, {} errors",
        report.suite,
        report.source,
        report.summary.passed,
        report.summary.failed,
        report.summary.errors
    );
    report
}

/// Presents a finished report through the progress interface, so an
/// offline run can drive the same views as a live session.
pub fn replay(report: &Report, sink: &dyn EventSink) {
    let infos: Vec<_> = report
        .results
        .iter()
        .map(|result| crate::model::StepInfo {
            index: result.index,
            name: result.name.clone(),
            descriptor: result.descriptor.clone(),
        })
        .collect();
    sink.on_steps_init(&infos);
    for result in &report.results {
        sink.on_step_update(result);
    }
    sink.on_status(if report.passed() {
        "All steps passed."
    } else {
        "Some steps did not pass."
    });
}

#[cfg(test)]
mod tests {
    use super::{replay, run};
    use crate::event::{InMemoryEventSink, ProgressEvent};
    use crate::extract::PayloadExtractor;
    use crate::model::{LogLine, StepKind, StepSpec, StepStatus, TestSuite};
    use crate::pattern::PatternSpec;

    fn suite() -> TestSuite {
        TestSuite::new(
            "demo",
            vec![
                StepSpec::new(
                    1,
                    "ready",
                    StepKind::Find {
                        pattern: PatternSpec::regex("READY"),
                        min_count: 1,
                    },
                ),
                StepSpec::new(
                    2,
                    "boot again",
                    StepKind::Find {
                        pattern: PatternSpec::regex("BOOT"),
                        min_count: 1,
                    },
                ),
            ],
        )
    }

    #[test]
    fn every_step_sees_the_whole_log() {
        let lines = LogLine::numbered(["BOOT", "READY"]);
        let report = run(&suite(), "log.txt", &lines, &PayloadExtractor::Heuristic);
        assert!(report.passed());
        assert_eq!(report.results[1].detail.line_index, Some(1));
    }

    #[test]
    fn replay_emits_init_updates_then_status() {
        let lines = LogLine::numbered(["READY"]);
        let report = run(&suite(), "log.txt", &lines, &PayloadExtractor::Heuristic);
        assert_eq!(report.results[1].status, StepStatus::Fail);

        let sink = InMemoryEventSink::new();
        replay(&report, &sink);
        let events = sink.events();
        assert!(matches!(&events[0], ProgressEvent::StepsInit(infos) if infos.len() == 2));
        assert_eq!(sink.updates(), report.results);
        assert_eq!(sink.statuses(), vec!["Some steps did not pass."]);
    }
}
