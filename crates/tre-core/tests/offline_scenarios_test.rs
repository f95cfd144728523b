use serde::Deserialize;
use tre_core::{aggregate, suite, LogLine, PayloadExtractor, StepStatus};

#[derive(Debug, Deserialize)]
struct Fixture {
    cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
struct Case {
    name: String,
    lines: Vec<String>,
    suite: serde_json::Value,
    expect: Vec<Expect>,
}

#[derive(Debug, Deserialize)]
struct Expect {
    status: StepStatus,
    line_index: Option<usize>,
}

fn load_fixture() -> Fixture {
    let path = format!(
        "{}/testdata/offline_scenarios.json",
        env!("CARGO_MANIFEST_DIR")
    );
    let raw = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(err) => panic!("failed reading fixture {path}: {err}"),
    };
    match serde_json::from_str(&raw) {
        Ok(data) => data,
        Err(err) => panic!("failed parsing fixture {path}: {err}"),
    }
}

#[test]
fn offline_fixture_matches_expected_verdicts() {
    for case in load_fixture().cases {
        let parsed = match suite::parse(&case.suite.to_string(), &case.name) {
            Ok(value) => value,
            Err(err) => panic!("fixture case {}: load: {err}", case.name),
        };
        let lines = LogLine::numbered(case.lines.iter().cloned());
        let report = aggregate::run(&parsed, "fixture.log", &lines, &PayloadExtractor::default());

        assert_eq!(
            report.results.len(),
            case.expect.len(),
            "fixture case {}: result count",
            case.name
        );
        for (result, expect) in report.results.iter().zip(&case.expect) {
            assert_eq!(
                result.status, expect.status,
                "fixture case {} step {}: status",
                case.name, result.index
            );
            assert_eq!(
                result.detail.line_index, expect.line_index,
                "fixture case {} step {}: line index",
                case.name, result.index
            );
        }
    }
}

#[test]
fn aggregator_is_idempotent() {
    let parsed = match suite::parse(
        r#"[{"find": {"pattern": "b"}}, {"not_find": {"pattern": "z"}}, {"sequence": ["a", "c"]}]"#,
        "idem",
    ) {
        Ok(value) => value,
        Err(err) => panic!("load: {err}"),
    };
    let lines = LogLine::numbered(["a", "b", "c"]);
    let first = aggregate::run(&parsed, "log", &lines, &PayloadExtractor::default());
    let second = aggregate::run(&parsed, "log", &lines, &PayloadExtractor::default());
    assert_eq!(first.results, second.results);
    assert_eq!(first.summary, second.summary);
}

#[test]
fn load_file_reads_suite_from_disk() {
    let dir = match tempfile::tempdir() {
        Ok(value) => value,
        Err(err) => panic!("tempdir: {err}"),
    };
    let path = dir.path().join("smoke.json");
    if let Err(err) = std::fs::write(&path, r#"[{"find": {"pattern": "ok"}}]"#) {
        panic!("write: {err}");
    }
    let loaded = match suite::load_file(&path) {
        Ok(value) => value,
        Err(err) => panic!("load: {err}"),
    };
    assert_eq!(loaded.name, "smoke");
    assert_eq!(loaded.len(), 1);
    assert!(suite::load_file(&dir.path().join("missing.json")).is_err());
}
