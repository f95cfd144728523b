//! `tre online`: run suites against a live log stream.
//!
//! Progress is printed as it arrives. Commands typed on stdin (`pause`,
//! `resume`, `stop`) steer the session; closing stdin leaves it running.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tre_core::report::RenderOptions;
use tre_core::suite::timeout_from_secs;
use tre_core::{ChannelEventSink, Report, TestSuite};
use tre_session::{Endpoint, Engine, SessionHandle, SessionState};

use crate::args::{split_flag, split_list, take_value, CliError, CommonArgs};
use crate::check::load_suites;
use crate::config::load_config;
use crate::console::{summary_line, write_event};
use crate::logging::init_logging;
use crate::reports::{generator_info, ReportTarget};

const DRAIN_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    pub host: String,
    pub port: Option<u16>,
    pub suites: Vec<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub formats: Option<Vec<String>>,
    pub no_report: bool,
    pub step_timeout: Option<f64>,
    pub reconnect: Option<u32>,
    pub common: CommonArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Stop,
}

pub fn parse_control_command(line: &str) -> Option<ControlCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "pause" | "p" => Some(ControlCommand::Pause),
        "resume" | "r" => Some(ControlCommand::Resume),
        "stop" | "s" | "q" | "quit" => Some(ControlCommand::Stop),
        _ => None,
    }
}

pub fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut out = Args {
        host: "127.0.0.1".to_string(),
        ..Args::default()
    };
    let mut idx = 0usize;
    while idx < argv.len() {
        let (key, inline) = split_flag(&argv[idx]);
        if out
            .common
            .take(&key, argv, &mut idx, inline.clone())
            .map_err(CliError::Usage)?
        {
            idx += 1;
            continue;
        }
        let mut value =
            |flag: &str| take_value(argv, &mut idx, inline.clone(), flag).map_err(CliError::Usage);
        match key.as_str() {
            "--host" => out.host = value("--host")?,
            "--port" => {
                let raw = value("--port")?;
                out.port = Some(
                    raw.trim()
                        .parse::<u16>()
                        .map_err(|_| CliError::Usage(format!("invalid --port: {raw}")))?,
                );
            }
            "--suite" => out.suites.push(PathBuf::from(value("--suite")?)),
            "--out" => out.out_dir = Some(PathBuf::from(value("--out")?)),
            "--format" => out.formats = Some(split_list(&value("--format")?)),
            "--no-report" => out.no_report = true,
            "--step-timeout" => {
                let raw = value("--step-timeout")?;
                let secs = raw
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| timeout_from_secs(*secs).is_some())
                    .ok_or_else(|| CliError::Usage(format!("invalid --step-timeout: {raw}")))?;
                out.step_timeout = Some(secs);
            }
            "--reconnect" => {
                let raw = value("--reconnect")?;
                out.reconnect = Some(
                    raw.trim()
                        .parse::<u32>()
                        .map_err(|_| CliError::Usage(format!("invalid --reconnect: {raw}")))?,
                );
            }
            "-h" | "--help" => return Err(CliError::Usage(String::new())),
            other => return Err(CliError::Usage(format!("unknown flag: {other}"))),
        }
        idx += 1;
    }
    if out.host.trim().is_empty() {
        return Err(CliError::Usage("--host must not be empty".to_string()));
    }
    if out.port.is_none() {
        return Err(CliError::Usage("--port is required".to_string()));
    }
    if out.suites.is_empty() {
        return Err(CliError::Usage("at least one --suite is required".to_string()));
    }
    Ok(out)
}

/// Feeds stdin commands to the session until the reader closes or a stop
/// was requested.
pub fn control_loop(handle: Arc<SessionHandle>, mut reader: Box<dyn Read + Send>) {
    let mut buf = String::new();
    let mut local = [0u8; 1024];
    loop {
        match reader.read(&mut local) {
            Ok(0) => return,
            Ok(n) => {
                buf.push_str(&String::from_utf8_lossy(&local[..n]));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..pos + 1);
                    if line.is_empty() {
                        continue;
                    }
                    match parse_control_command(&line) {
                        Some(ControlCommand::Pause) => {
                            handle.pause();
                        }
                        Some(ControlCommand::Resume) => {
                            handle.resume();
                        }
                        Some(ControlCommand::Stop) => {
                            handle.request_stop();
                            return;
                        }
                        None => tracing::warn!("unknown control command {line:?}"),
                    }
                }
            }
            Err(err) => {
                tracing::warn!("control reader error: {err}");
                return;
            }
        }
    }
}

pub fn run(
    argv: &[String],
    control: Box<dyn Read + Send>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> Result<bool, CliError> {
    let args = parse_args(argv)?;
    let (mut cfg, _used) = load_config(args.common.config_path()).map_err(CliError::Failed)?;
    args.common.apply(&mut cfg);
    if let Some(secs) = args.step_timeout {
        cfg.online.step_timeout_secs = Some(secs);
    }
    if let Some(attempts) = args.reconnect {
        cfg.online.reconnect_attempts = attempts;
    }
    init_logging(&cfg.logging);

    let target = ReportTarget {
        out_dir: args.out_dir.clone().unwrap_or_else(|| cfg.report.out_dir.clone()),
        formats: if args.no_report {
            Vec::new()
        } else {
            args.formats.clone().unwrap_or_else(|| cfg.report.formats.clone())
        },
        options: RenderOptions {
            preview_limit: cfg.report.preview_limit,
            title: "Live session".to_string(),
            generator_info: generator_info(),
        },
    };
    target.validate().map_err(CliError::Usage)?;

    let suites = load_suites(&args.suites, stderr)?;
    let name = suites
        .iter()
        .map(|suite| suite.name.as_str())
        .collect::<Vec<_>>()
        .join("+");
    let suite = TestSuite::concat(name, &suites);
    let step_count = suite.len();

    let endpoint = Endpoint::new(args.host.trim(), args.port.unwrap_or_default());
    let engine = Engine::new(cfg.session_options());
    let (tx, rx) = mpsc::channel();
    let handle = engine
        .start(endpoint.clone(), suite.steps.clone(), Arc::new(ChannelEventSink::new(tx)))
        .map_err(|err| CliError::Failed(err.to_string()))?;
    let handle = Arc::new(handle);

    let steering = Arc::clone(&handle);
    let spawned = thread::Builder::new()
        .name("tre-control".to_string())
        .spawn(move || control_loop(steering, control));
    if let Err(err) = spawned {
        tracing::warn!("stdin control unavailable: {err}");
    }

    loop {
        match rx.recv_timeout(DRAIN_TICK) {
            Ok(event) => {
                let _ = write_event(stdout, &event);
            }
            Err(RecvTimeoutError::Timeout) if handle.is_finished() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let outcome = handle
        .join()
        .ok_or_else(|| CliError::Failed("session worker did not report an outcome".to_string()))?;
    for event in rx.try_iter() {
        let _ = write_event(stdout, &event);
    }

    let report = Report::new(endpoint.to_string(), suite.name.clone(), outcome.results);
    let _ = writeln!(stdout, "{}", summary_line(&report.summary));
    let _ = writeln!(
        stdout,
        "lines: {} received, {} evaluated, {} dropped",
        outcome.lines.received, outcome.lines.evaluated, outcome.lines.dropped
    );
    target.write(&report, stdout).map_err(CliError::Failed)?;

    Ok(outcome.state == SessionState::Stopped
        && report.summary.total == step_count
        && report.passed())
}
