//! `tre validate`: load suites and list the steps that cannot run.

use std::io::Write;
use std::path::PathBuf;

use tre_core::suite;

use crate::args::{split_flag, take_value, CliError, CommonArgs};

pub fn run(argv: &[String], stdout: &mut dyn Write) -> Result<bool, CliError> {
    let mut suites = Vec::new();
    let mut common = CommonArgs::default();
    let mut idx = 0usize;
    while idx < argv.len() {
        let (key, inline) = split_flag(&argv[idx]);
        if common
            .take(&key, argv, &mut idx, inline.clone())
            .map_err(CliError::Usage)?
        {
            idx += 1;
            continue;
        }
        match key.as_str() {
            "--suite" => {
                let raw = take_value(argv, &mut idx, inline, "--suite").map_err(CliError::Usage)?;
                suites.push(PathBuf::from(raw));
            }
            "-h" | "--help" => return Err(CliError::Usage(String::new())),
            other if !other.starts_with('-') => suites.push(PathBuf::from(other)),
            other => return Err(CliError::Usage(format!("unknown flag: {other}"))),
        }
        idx += 1;
    }
    if suites.is_empty() {
        return Err(CliError::Usage("at least one --suite is required".to_string()));
    }

    let mut clean = true;
    for path in &suites {
        let loaded = match suite::load_file(path) {
            Ok(loaded) => loaded,
            Err(err) => {
                let _ = writeln!(stdout, "{}: {err}", path.display());
                clean = false;
                continue;
            }
        };
        let problems = suite::validate(&loaded);
        let _ = writeln!(
            stdout,
            "{}: {} step(s), {} invalid",
            path.display(),
            loaded.len(),
            problems.len()
        );
        for problem in &problems {
            let _ = writeln!(stdout, "  {problem}");
        }
        clean &= problems.is_empty();
    }
    Ok(clean)
}
