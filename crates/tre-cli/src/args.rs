//! Flag parsing shared by the subcommands.

use std::fmt;

/// Why a command stopped early. Usage problems exit with 2, everything else
/// with 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    Usage(String),
    Failed(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(text) | Self::Failed(text) => f.write_str(text),
        }
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Failed(_) => 1,
        }
    }
}

/// Flags accepted by every subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonArgs {
    pub config_file: String,
    pub log_level: String,
    pub log_format: String,
    pub payload_regex: String,
    pub payload_mode: String,
}

impl CommonArgs {
    /// Consumes `key` if it is a common flag. Returns whether it was one.
    pub fn take(
        &mut self,
        key: &str,
        argv: &[String],
        idx: &mut usize,
        inline: Option<String>,
    ) -> Result<bool, String> {
        let slot = match key {
            "--config" => &mut self.config_file,
            "--log-level" => &mut self.log_level,
            "--log-format" => &mut self.log_format,
            "--payload-regex" => &mut self.payload_regex,
            "--payload-mode" => &mut self.payload_mode,
            _ => return Ok(false),
        };
        *slot = take_value(argv, idx, inline, key)?;
        Ok(true)
    }

    pub fn config_path(&self) -> Option<&str> {
        if self.config_file.trim().is_empty() {
            None
        } else {
            Some(self.config_file.as_str())
        }
    }

    pub fn apply(&self, cfg: &mut crate::config::Config) {
        if !self.log_level.trim().is_empty() {
            cfg.logging.level = self.log_level.trim().to_string();
        }
        if !self.log_format.trim().is_empty() {
            cfg.logging.format = self.log_format.trim().to_string();
        }
        if !self.payload_regex.trim().is_empty() {
            cfg.payload.regex = Some(self.payload_regex.trim().to_string());
        }
        if !self.payload_mode.trim().is_empty() {
            cfg.payload.mode = Some(self.payload_mode.trim().to_string());
        }
    }
}

/// Splits `--flag=value` into its key and inline value.
pub fn split_flag(token: &str) -> (String, Option<String>) {
    match token.split_once('=') {
        Some((k, v)) => (k.to_string(), Some(v.to_string())),
        None => (token.to_string(), None),
    }
}

pub fn take_value(
    argv: &[String],
    idx: &mut usize,
    inline: Option<String>,
    flag: &str,
) -> Result<String, String> {
    if let Some(value) = inline {
        return Ok(value);
    }
    *idx += 1;
    argv.get(*idx)
        .cloned()
        .ok_or_else(|| format!("missing value for {flag}"))
}

/// Comma separated list, trimmed and lower-cased, empties dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
