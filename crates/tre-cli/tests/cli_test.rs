use std::io::Write;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tre_cli::run_for_test;

const LOG: &str = "t1 INFO [ECU1 APP] boot complete\nt2 ERROR [ECU1 APP] sensor timeout\n";

const PASSING_SUITE: &str = r#"[
    {"name": "boot", "find": {"pattern": "boot complete"}},
    {"name": "no panic", "not_find": {"pattern": "PANIC"}},
    {"name": "order", "sequence": ["boot", "sensor"]}
]"#;

fn write_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    if let Err(err) = std::fs::write(&path, body) {
        panic!("write {name}: {err}");
    }
    path
}

fn tempdir() -> tempfile::TempDir {
    match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(err) => panic!("tempdir: {err}"),
    }
}

fn report_extensions(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => panic!("read report dir: {err}"),
    };
    let mut extensions: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
        })
        .collect();
    extensions.sort();
    extensions
}

#[test]
fn check_passing_suite_writes_reports_and_exits_zero() {
    let dir = tempdir();
    let log = write_file(dir.path(), "bench.log", LOG);
    let suite = write_file(dir.path(), "smoke.json", PASSING_SUITE);
    let config = write_file(dir.path(), "config.yaml", "");
    let out_dir = dir.path().join("reports");

    let out = run_for_test(&[
        "check",
        "--config",
        &config.to_string_lossy(),
        "--log",
        &log.to_string_lossy(),
        "--suite",
        &suite.to_string_lossy(),
        "--out",
        &out_dir.to_string_lossy(),
        "--format=json,csv",
    ]);
    assert_eq!(out.exit_code, 0, "stderr: {}", out.stderr);
    assert!(out.stdout.contains("### smoke on bench.log"));
    assert!(out.stdout.contains("  1 PASS  boot (line 1) | boot complete"));
    assert!(out.stdout.contains("3 step(s): 3 passed, 0 failed, 0 error(s)"));
    assert!(out.stdout.contains("== All steps passed."));
    assert_eq!(report_extensions(&out_dir), vec!["csv", "json"]);
}

#[test]
fn check_with_failing_step_exits_one() {
    let dir = tempdir();
    let log = write_file(dir.path(), "bench.log", LOG);
    let suite = write_file(
        dir.path(),
        "reverse.json",
        r#"[{"name": "reversed", "sequence": ["sensor timeout", "boot complete"]}]"#,
    );
    let config = write_file(dir.path(), "config.yaml", "");

    let out = run_for_test(&[
        "check",
        "--config",
        &config.to_string_lossy(),
        "--log",
        &log.to_string_lossy(),
        "--suite",
        &suite.to_string_lossy(),
        "--no-report",
    ]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stdout.contains("FAIL  reversed"));
    assert!(out.stdout.contains("stuck at \"boot complete\""));
}

#[test]
fn check_reports_invalid_steps_as_warnings() {
    let dir = tempdir();
    let log = write_file(dir.path(), "bench.log", LOG);
    let suite = write_file(
        dir.path(),
        "mixed.json",
        r#"[{"name": "boot", "find": {"pattern": "boot"}}, {"name": "empty"}]"#,
    );
    let config = write_file(dir.path(), "config.yaml", "");

    let out = run_for_test(&[
        "check",
        "--config",
        &config.to_string_lossy(),
        "--log",
        &log.to_string_lossy(),
        "--suite",
        &suite.to_string_lossy(),
        "--no-report",
    ]);
    assert_eq!(out.exit_code, 1);
    assert!(out
        .stderr
        .contains("Step 2 (empty): missing one of find/not_find/sequence/action"));
    assert!(out.stdout.contains("ERROR empty"));
}

#[test]
fn check_missing_log_is_a_runtime_error() {
    let dir = tempdir();
    let suite = write_file(dir.path(), "smoke.json", PASSING_SUITE);
    let config = write_file(dir.path(), "config.yaml", "");
    let missing = dir.path().join("missing.log");

    let out = run_for_test(&[
        "check",
        "--config",
        &config.to_string_lossy(),
        "--log",
        &missing.to_string_lossy(),
        "--suite",
        &suite.to_string_lossy(),
    ]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stderr.starts_with("Error:"), "stderr: {}", out.stderr);
}

#[test]
fn check_unknown_format_is_a_usage_error() {
    let out = run_for_test(&["check", "--log", "a.log", "--suite", "s.json", "--format", "pdf"]);
    assert_eq!(out.exit_code, 2);
    assert!(out.stderr.contains("unknown report format: pdf"));
}

#[test]
fn validate_lists_invalid_entries() {
    let dir = tempdir();
    let good = write_file(dir.path(), "good.json", PASSING_SUITE);
    let bad = write_file(
        dir.path(),
        "bad.json",
        r#"[{"name": "both", "find": {"pattern": "a"}, "not_find": {"pattern": "b"}}, 7]"#,
    );

    let out = run_for_test(&["validate", "--suite", &good.to_string_lossy()]);
    assert_eq!(out.exit_code, 0);
    assert!(out.stdout.contains("3 step(s), 0 invalid"));

    let out = run_for_test(&["validate", &bad.to_string_lossy()]);
    assert_eq!(out.exit_code, 1);
    assert!(out
        .stdout
        .contains("Step 1 (both): multiple modes present (find, not_find)"));
    assert!(out.stdout.contains("Step 2 (Step 2): must be an object"));
}

#[test]
fn validate_reports_unparseable_documents() {
    let dir = tempdir();
    let broken = write_file(dir.path(), "broken.json", "{\"not\": \"a list\"}");
    let out = run_for_test(&["validate", "--suite", &broken.to_string_lossy()]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stdout.contains("broken.json"));
}

#[test]
fn online_session_against_tcp_stream() {
    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(err) => panic!("bind: {err}"),
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(err) => panic!("local addr: {err}"),
    };
    let server = thread::spawn(move || {
        if let Ok((mut socket, _)) = listener.accept() {
            let _ = socket.write_all(LOG.as_bytes());
            thread::sleep(Duration::from_millis(500));
        }
    });

    let dir = tempdir();
    let suite = write_file(
        dir.path(),
        "live.json",
        r#"[
            {"name": "boot", "find": {"pattern": "boot complete"}},
            {"name": "sensor", "find": {"pattern": "sensor timeout"}}
        ]"#,
    );
    let config = write_file(dir.path(), "config.yaml", "online:\n  read_tick_ms: 20\n");
    let port = port.to_string();
    let out = run_for_test(&[
        "online",
        "--config",
        &config.to_string_lossy(),
        "--port",
        &port,
        "--suite",
        &suite.to_string_lossy(),
        "--no-report",
    ]);
    let _ = server.join();
    assert_eq!(out.exit_code, 0, "stdout: {}\nstderr: {}", out.stdout, out.stderr);
    assert!(out.stdout.contains(&format!("== Connected to 127.0.0.1:{port}.")));
    assert!(out.stdout.contains("  2 PASS  sensor (line 2) | sensor timeout"));
    assert!(out.stdout.contains("== All steps completed."));
    assert!(out.stdout.contains("lines: 2 received, 2 evaluated, 0 dropped"));
}

#[test]
fn online_connect_failure_exits_one() {
    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(err) => panic!("bind: {err}"),
    };
    let port = match listener.local_addr() {
        Ok(addr) => addr.port().to_string(),
        Err(err) => panic!("local addr: {err}"),
    };
    drop(listener);

    let dir = tempdir();
    let suite = write_file(dir.path(), "live.json", PASSING_SUITE);
    let config = write_file(
        dir.path(),
        "config.yaml",
        "online:\n  connect_attempts: 1\n  connect_timeout_ms: 200\n",
    );
    let out = run_for_test(&[
        "online",
        "--config",
        &config.to_string_lossy(),
        "--port",
        &port,
        "--suite",
        &suite.to_string_lossy(),
        "--no-report",
    ]);
    assert_eq!(out.exit_code, 1);
    assert!(out.stdout.contains("== Failed to connect to 127.0.0.1:"));
    assert!(out.stdout.contains("0 step(s): 0 passed"));
}
