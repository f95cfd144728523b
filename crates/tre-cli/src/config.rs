use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tre_core::suite::timeout_from_secs;
use tre_core::ExtractorConfig;
use tre_session::{ConnectOptions, SessionOptions};

#[derive(Debug, Clone)]
pub struct Config {
    pub payload: ExtractorConfig,
    pub online: OnlineConfig,
    pub report: ReportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct OnlineConfig {
    pub connect_timeout_ms: u64,
    pub connect_attempts: u32,
    pub backoff_base_ms: u64,
    pub read_tick_ms: u64,
    pub reconnect_attempts: u32,
    pub step_timeout_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub out_dir: PathBuf,
    pub formats: Vec<String>,
    pub preview_limit: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            payload: ExtractorConfig::default(),
            online: OnlineConfig {
                connect_timeout_ms: 5000,
                connect_attempts: 5,
                backoff_base_ms: 500,
                read_tick_ms: 200,
                reconnect_attempts: 0,
                step_timeout_secs: None,
            },
            report: ReportConfig {
                out_dir: PathBuf::from("reports"),
                formats: vec!["html".to_string(), "json".to_string()],
                preview_limit: 200,
            },
            logging: LoggingConfig {
                level: "warn".to_string(),
                format: "console".to_string(),
            },
        }
    }
}

impl Config {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect: ConnectOptions {
                timeout: Duration::from_millis(self.online.connect_timeout_ms),
                attempts: self.online.connect_attempts,
                backoff_base: Duration::from_millis(self.online.backoff_base_ms),
                read_tick: Duration::from_millis(self.online.read_tick_ms),
            },
            reconnect_attempts: self.online.reconnect_attempts,
            default_step_timeout: self.online.step_timeout_secs.and_then(timeout_from_secs),
            extractor: tre_core::PayloadExtractor::from_config(&self.payload),
            ..SessionOptions::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    #[serde(default)]
    payload: PartialPayloadConfig,
    #[serde(default)]
    online: PartialOnlineConfig,
    #[serde(default)]
    report: PartialReportConfig,
    #[serde(default)]
    logging: PartialLoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
struct PartialPayloadConfig {
    #[serde(default)]
    regex: String,
    #[serde(default)]
    mode: String,
}

#[derive(Debug, Default, Deserialize)]
struct PartialOnlineConfig {
    #[serde(default)]
    connect_timeout_ms: i64,
    #[serde(default)]
    connect_attempts: i64,
    #[serde(default)]
    backoff_base_ms: i64,
    #[serde(default)]
    read_tick_ms: i64,
    #[serde(default)]
    reconnect_attempts: i64,
    #[serde(default)]
    step_timeout_secs: f64,
}

#[derive(Debug, Default, Deserialize)]
struct PartialReportConfig {
    #[serde(default)]
    out_dir: String,
    #[serde(default)]
    formats: Vec<String>,
    #[serde(default)]
    preview_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialLoggingConfig {
    #[serde(default)]
    level: String,
    #[serde(default)]
    format: String,
}

/// Loads settings: defaults < config file. An explicitly named file must be
/// readable; the default location is optional.
pub fn load_config(config_file: Option<&str>) -> Result<(Config, Option<PathBuf>), String> {
    let mut cfg = Config::default();

    let explicit = config_file
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let (path_to_try, used) = match explicit {
        Some(path) => (Some(path), true),
        None => (default_config_path(), false),
    };

    if let Some(path) = path_to_try {
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let parsed: PartialConfig = if text.trim().is_empty() {
                    PartialConfig::default()
                } else {
                    serde_yaml::from_str(&text).map_err(|err| format!("parse config: {err}"))?
                };
                apply_partial(&mut cfg, parsed)?;
                return Ok((cfg, Some(path)));
            }
            Err(err) => {
                if used {
                    return Err(format!("failed to load config file: {err}"));
                }
            }
        }
    }

    Ok((cfg, None))
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.trim().is_empty() {
            return Some(PathBuf::from(xdg).join("tre").join("config.yaml"));
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.trim().is_empty() {
            return Some(
                PathBuf::from(home)
                    .join(".config")
                    .join("tre")
                    .join("config.yaml"),
            );
        }
    }
    None
}

fn apply_partial(cfg: &mut Config, partial: PartialConfig) -> Result<(), String> {
    if !partial.payload.regex.trim().is_empty() {
        cfg.payload.regex = Some(partial.payload.regex.trim().to_string());
    }
    if !partial.payload.mode.trim().is_empty() {
        cfg.payload.mode = Some(partial.payload.mode.trim().to_string());
    }

    let online = &partial.online;
    if online.connect_timeout_ms > 0 {
        cfg.online.connect_timeout_ms = online.connect_timeout_ms as u64;
    }
    if online.connect_attempts > 0 {
        cfg.online.connect_attempts = clamp_u32(online.connect_attempts);
    }
    if online.backoff_base_ms > 0 {
        cfg.online.backoff_base_ms = online.backoff_base_ms as u64;
    }
    if online.read_tick_ms > 0 {
        cfg.online.read_tick_ms = online.read_tick_ms as u64;
    }
    if online.reconnect_attempts > 0 {
        cfg.online.reconnect_attempts = clamp_u32(online.reconnect_attempts);
    }
    if online.step_timeout_secs != 0.0 {
        if timeout_from_secs(online.step_timeout_secs).is_none() {
            return Err(format!(
                "online.step_timeout_secs out of range: {}",
                online.step_timeout_secs
            ));
        }
        cfg.online.step_timeout_secs = Some(online.step_timeout_secs);
    }

    if !partial.report.out_dir.trim().is_empty() {
        cfg.report.out_dir = expand_tilde(partial.report.out_dir.trim())?;
    }
    let formats: Vec<String> = partial
        .report
        .formats
        .iter()
        .map(|f| f.trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    if !formats.is_empty() {
        cfg.report.formats = formats;
    }
    if let Some(limit) = partial.report.preview_limit {
        cfg.report.preview_limit = limit;
    }

    if !partial.logging.level.trim().is_empty() {
        cfg.logging.level = partial.logging.level.trim().to_string();
    }
    if !partial.logging.format.trim().is_empty() {
        cfg.logging.format = partial.logging.format.trim().to_string();
    }
    Ok(())
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn expand_tilde(input: &str) -> Result<PathBuf, String> {
    if input == "~" {
        let home = std::env::var("HOME").map_err(|_| "failed to resolve HOME".to_string())?;
        return Ok(PathBuf::from(home));
    }
    if let Some(rest) = input.strip_prefix("~/") {
        let home = std::env::var("HOME").map_err(|_| "failed to resolve HOME".to_string())?;
        return Ok(PathBuf::from(home).join(rest));
    }
    Ok(Path::new(input).to_path_buf())
}
