//! Command-line front end: `tre check`, `tre validate`, `tre online`.

use std::io::{Read, Write};

pub mod args;
pub mod check;
pub mod config;
pub mod console;
pub mod logging;
pub mod online;
pub mod reports;
pub mod validate;

use args::CliError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    run_with_args(&args, Box::new(std::io::stdin()), &mut stdout, &mut stderr)
}

pub fn run_for_test(args: &[&str]) -> CommandOutput {
    let owned: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = run_with_args(&owned, Box::new(std::io::empty()), &mut stdout, &mut stderr);
    CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code,
    }
}

/// Runs one command. Exit codes: 0 when every step passed, 1 on failed
/// steps or runtime errors, 2 on usage errors.
pub fn run_with_args(
    argv: &[String],
    control: Box<dyn Read + Send>,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let Some((command, rest)) = argv.split_first() else {
        let _ = write!(stderr, "{}", usage(Some("missing command")));
        return 2;
    };
    let result = match command.as_str() {
        "check" => check::run(rest, stdout, stderr),
        "validate" => validate::run(rest, stdout),
        "online" => online::run(rest, control, stdout, stderr),
        "-h" | "--help" | "help" => {
            let _ = write!(stdout, "{}", usage(None));
            return 0;
        }
        "--version" | "version" => {
            let _ = writeln!(stdout, "{}", reports::generator_info());
            return 0;
        }
        other => Err(CliError::Usage(format!("unknown command: {other}"))),
    };
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(CliError::Usage(message)) => {
            let text = if message.is_empty() {
                usage(None)
            } else {
                usage(Some(&message))
            };
            let _ = write!(stderr, "{text}");
            2
        }
        Err(err @ CliError::Failed(_)) => {
            let _ = writeln!(stderr, "Error: {err}");
            err.exit_code()
        }
    }
}

fn usage(message: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(msg) = message {
        if !msg.trim().is_empty() {
            out.push_str(&format!("Error: {msg}\n\n"));
        }
    }
    out.push_str("Usage: tre <command> [options]\n\n");
    out.push_str("Commands:\n");
    out.push_str("  check     evaluate log files against suites\n");
    out.push_str("  validate  list suite steps that cannot be evaluated\n");
    out.push_str("  online    follow a live log stream (stdin: pause, resume, stop)\n\n");
    out.push_str("check options:\n");
    out.push_str("  --log path              log file (repeatable, required)\n");
    out.push_str("  --suite path            suite JSON file (repeatable, required)\n");
    out.push_str("  --out dir               report directory (default from config)\n");
    out.push_str("  --format list           report formats: html,json,csv\n");
    out.push_str("  --no-report             do not write report files\n");
    out.push_str("  --preview-limit int     matched-line preview length in HTML, 0 = full\n");
    out.push_str("  --title string          report title\n\n");
    out.push_str("online options:\n");
    out.push_str("  --host string           stream host (default 127.0.0.1)\n");
    out.push_str("  --port int              stream port (required)\n");
    out.push_str("  --suite path            suite JSON file (repeatable, required)\n");
    out.push_str("  --step-timeout secs     timeout for steps that set none\n");
    out.push_str("  --reconnect int         reconnects after the stream drops (default 0)\n");
    out.push_str("  --out, --format, --no-report as for check\n\n");
    out.push_str("Common options:\n");
    out.push_str("  --config string         config file (default $HOME/.config/tre/config.yaml)\n");
    out.push_str("  --payload-regex string  regex whose first group is the display payload\n");
    out.push_str("  --payload-mode string   after_last_pipe, after_last_bracket, after_last_colon\n");
    out.push_str("  --log-level string      override logging level (debug, info, warn, error)\n");
    out.push_str("  --log-format string     override logging format (json, console)\n");
    out
}

#[cfg(test)]
mod tests {
    use super::run_for_test;

    #[test]
    fn missing_command_is_a_usage_error() {
        let out = run_for_test(&[]);
        assert_eq!(out.exit_code, 2);
        assert!(out.stderr.starts_with("Error: missing command"));
    }

    #[test]
    fn help_goes_to_stdout() {
        let out = run_for_test(&["--help"]);
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("Usage: tre <command>"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let out = run_for_test(&["frobnicate"]);
        assert_eq!(out.exit_code, 2);
        assert!(out.stderr.contains("unknown command: frobnicate"));
    }
}
