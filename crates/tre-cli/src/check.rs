//! `tre check`: evaluate recorded logs against suites.

use std::io::Write;
use std::path::{Path, PathBuf};

use tre_core::report::RenderOptions;
use tre_core::{aggregate, log, suite, InMemoryEventSink, PayloadExtractor, TestSuite};

use crate::args::{split_flag, split_list, take_value, CliError, CommonArgs};
use crate::config::load_config;
use crate::console::{summary_line, write_event};
use crate::logging::init_logging;
use crate::reports::{generator_info, ReportTarget};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args {
    pub logs: Vec<PathBuf>,
    pub suites: Vec<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub formats: Option<Vec<String>>,
    pub no_report: bool,
    pub preview_limit: Option<usize>,
    pub title: String,
    pub common: CommonArgs,
}

pub fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut out = Args::default();
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
        match key.as_str() {
            "--log" => {
                let raw = take_value(argv, &mut idx, inline, "--log").map_err(CliError::Usage)?;
                out.logs.push(PathBuf::from(raw));
            }
            "--suite" => {
                let raw = take_value(argv, &mut idx, inline, "--suite").map_err(CliError::Usage)?;
                out.suites.push(PathBuf::from(raw));
            }
            "--out" => {
                out.out_dir = Some(PathBuf::from(
                    take_value(argv, &mut idx, inline, "--out").map_err(CliError::Usage)?,
                ))
            }
            "--format" => {
                let raw = take_value(argv, &mut idx, inline, "--format").map_err(CliError::Usage)?;
                out.formats = Some(split_list(&raw));
            }
            "--no-report" => out.no_report = true,
            "--preview-limit" => {
                let raw =
                    take_value(argv, &mut idx, inline, "--preview-limit").map_err(CliError::Usage)?;
                out.preview_limit = Some(
                    raw.trim()
                        .parse::<usize>()
                        .map_err(|_| CliError::Usage(format!("invalid --preview-limit: {raw}")))?,
                );
            }
            "--title" => {
                out.title = take_value(argv, &mut idx, inline, "--title").map_err(CliError::Usage)?;
            }
            "-h" | "--help" => return Err(CliError::Usage(String::new())),
            other => return Err(CliError::Usage(format!("unknown flag: {other}"))),
        }
        idx += 1;
    }
    if out.logs.is_empty() {
        return Err(CliError::Usage("at least one --log is required".to_string()));
    }
    if out.suites.is_empty() {
        return Err(CliError::Usage("at least one --suite is required".to_string()));
    }
    Ok(out)
}

/// Loads every suite file, printing load-time problems as warnings.
pub(crate) fn load_suites(paths: &[PathBuf], stderr: &mut dyn Write) -> Result<Vec<TestSuite>, CliError> {
    let mut suites = Vec::with_capacity(paths.len());
    for path in paths {
        let loaded = suite::load_file(path).map_err(|err| CliError::Failed(err.to_string()))?;
        for problem in suite::validate(&loaded) {
            let _ = writeln!(stderr, "warning: {}: {problem}", path.display());
        }
        suites.push(loaded);
    }
    Ok(suites)
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn run(argv: &[String], stdout: &mut dyn Write, stderr: &mut dyn Write) -> Result<bool, CliError> {
    let args = parse_args(argv)?;
    let (mut cfg, _used) = load_config(args.common.config_path()).map_err(CliError::Failed)?;
    args.common.apply(&mut cfg);
    init_logging(&cfg.logging);

    let target = ReportTarget {
        out_dir: args.out_dir.clone().unwrap_or_else(|| cfg.report.out_dir.clone()),
        formats: if args.no_report {
            Vec::new()
        } else {
            args.formats.clone().unwrap_or_else(|| cfg.report.formats.clone())
        },
        options: RenderOptions {
            preview_limit: args.preview_limit.unwrap_or(cfg.report.preview_limit),
            title: if args.title.trim().is_empty() {
                "Log check".to_string()
            } else {
                args.title.clone()
            },
            generator_info: generator_info(),
        },
    };
    target.validate().map_err(CliError::Usage)?;

    let suites = load_suites(&args.suites, stderr)?;
    let extractor = PayloadExtractor::from_config(&cfg.payload);

    let mut all_passed = true;
    for log_path in &args.logs {
        let lines = log::read_log(log_path).map_err(|err| CliError::Failed(err.to_string()))?;
        let source = source_name(log_path);
        tracing::info!("checking {} ({} lines)", log_path.display(), lines.len());
        for suite in &suites {
            let report = aggregate::run(suite, &source, &lines, &extractor);
            let _ = writeln!(stdout, "### {} on {}", report.suite, report.source);
            let view = InMemoryEventSink::new();
            aggregate::replay(&report, &view);
            for event in view.events() {
                let _ = write_event(stdout, &event);
            }
            let _ = writeln!(stdout, "{}", summary_line(&report.summary));
            target.write(&report, stdout).map_err(CliError::Failed)?;
            all_passed &= report.passed();
        }
    }
    Ok(all_passed)
}

#[cfg(test)]
mod tests {
    use super::{parse_args, CliError};

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn collects_repeated_flags() {
        let args = match parse_args(&argv(&[
            "--log", "a.log", "--log=b.log", "--suite", "s.json", "--format", "csv,HTML",
        ])) {
            Ok(args) => args,
            Err(err) => panic!("parse: {err}"),
        };
        assert_eq!(args.logs.len(), 2);
        assert_eq!(args.suites.len(), 1);
        assert_eq!(args.formats, Some(vec!["csv".to_string(), "html".to_string()]));
    }

    #[test]
    fn requires_log_and_suite() {
        assert_eq!(
            parse_args(&argv(&["--suite", "s.json"])),
            Err(CliError::Usage("at least one --log is required".to_string()))
        );
        assert!(matches!(
            parse_args(&argv(&["--log", "a", "--suite", "s", "--bogus"])),
            Err(CliError::Usage(message)) if message == "unknown flag: --bogus"
        ));
    }

    #[test]
    fn rejects_bad_preview_limit() {
        assert!(matches!(
            parse_args(&argv(&["--log", "a", "--suite", "s", "--preview-limit", "x"])),
            Err(CliError::Usage(_))
        ));
    }
}
