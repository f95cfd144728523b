//! Display payload extraction.
//!
//! Raw diagnostic lines usually carry a header (timestamp, ECU, app and
//! context ids) in front of the message. The extractor isolates the message
//! for display; it never influences matching. [`split_header`] recovers the
//! ECU, app and context ids of `ECU::APP::CTX::message` lines for the header
//! constraints of a pattern.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    AfterLastPipe,
    AfterLastBracket,
    AfterLastColon,
}

impl SplitMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "after_last_pipe" => Some(Self::AfterLastPipe),
            "after_last_bracket" => Some(Self::AfterLastBracket),
            "after_last_colon" => Some(Self::AfterLastColon),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AfterLastPipe => "after_last_pipe",
            Self::AfterLastBracket => "after_last_bracket",
            Self::AfterLastColon => "after_last_colon",
        }
    }

    fn delimiter(self) -> char {
        match self {
            Self::AfterLastPipe => '|',
            Self::AfterLastBracket => ']',
            Self::AfterLastColon => ':',
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum PayloadExtractor {
    /// First capture group of a user regex.
    Regex(Regex),
    Split(SplitMode),
    #[default]
    Heuristic,
}

impl PayloadExtractor {
    /// Picks the strategy in priority order: regex, split mode, heuristic.
    /// An unusable regex or unknown mode falls through to the next option.
    pub fn from_config(config: &ExtractorConfig) -> Self {
        if let Some(raw) = config.regex.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            match Regex::new(raw) {
                Ok(regex) => return Self::Regex(regex),
                Err(err) => tracing::warn!("ignoring payload regex {raw:?}: {err}"),
            }
        }
        if let Some(raw) = config.mode.as_deref().filter(|s| !s.trim().is_empty()) {
            match SplitMode::parse(raw) {
                Some(mode) => return Self::Split(mode),
                None => tracing::warn!("unknown payload mode {raw:?}, using heuristic"),
            }
        }
        Self::Heuristic
    }

    pub fn extract(&self, line: &str) -> String {
        match self {
            Self::Regex(regex) => regex
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| line.trim().to_string()),
            Self::Split(mode) => match line.rsplit_once(mode.delimiter()) {
                Some((_, tail)) => tail.trim().to_string(),
                None => line.trim().to_string(),
            },
            Self::Heuristic => heuristic_payload(line),
        }
    }
}

pub fn heuristic_payload(line: &str) -> String {
    let cleaned = line.replace('\0', "");
    let mut current = cleaned.trim().to_string();

    if let Some(pos) = current.rfind(']') {
        let tail = current[pos + 1..].trim_matches(|c| matches!(c, ' ' | '-' | ':' | '|'));
        if !tail.is_empty() {
            current = tail.to_string();
        }
    }

    if current.contains('|') {
        let parts: Vec<&str> = current
            .split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.len() > 1 {
            if let Some(last) = parts.last() {
                current = (*last).to_string();
            }
        }
    }

    if let Some((_, right)) = current.rsplit_once(':') {
        let right = right.trim();
        if right.chars().count() >= 3 {
            current = right.to_string();
        }
    }

    current
}

/// Header ids of a `::`-separated diagnostic line. Fields the line does not
/// carry are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineHeader<'a> {
    pub ecu: Option<&'a str>,
    pub app: Option<&'a str>,
    pub ctx: Option<&'a str>,
}

/// Splits `ECU::APP::CTX::payload` style lines. Runs of two or more colons
/// separate fields and the last field is the payload; with more than four
/// fields only the last four count. Three fields read as `ECU::APP::payload`,
/// two as `APP::payload`.
pub fn split_header(line: &str) -> LineHeader<'_> {
    let parts = split_colon_runs(line.trim());
    let pick = |idx: usize| parts.get(idx).map(|p| p.trim()).filter(|p| !p.is_empty());
    match parts.len() {
        0 | 1 => LineHeader::default(),
        2 => LineHeader {
            app: pick(0),
            ..LineHeader::default()
        },
        3 => LineHeader {
            ecu: pick(0),
            app: pick(1),
            ctx: None,
        },
        n => LineHeader {
            ecu: pick(n - 4),
            app: pick(n - 3),
            ctx: pick(n - 2),
        },
    }
}

fn split_colon_runs(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b':' {
            idx += 1;
            continue;
        }
        let mut end = idx;
        while end < bytes.len() && bytes[end] == b':' {
            end += 1;
        }
        if end - idx >= 2 {
            parts.push(&text[start..idx]);
            start = end;
        }
        idx = end;
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::{
        heuristic_payload, split_header, ExtractorConfig, LineHeader, PayloadExtractor, SplitMode,
    };

    fn config(regex: Option<&str>, mode: Option<&str>) -> ExtractorConfig {
        ExtractorConfig {
            regex: regex.map(str::to_string),
            mode: mode.map(str::to_string),
        }
    }

    #[test]
    fn regex_group_wins_and_falls_back_to_full_line() {
        let extractor = PayloadExtractor::from_config(&config(Some(r"msg=(.*)$"), None));
        assert_eq!(extractor.extract("id=4 msg= hello "), "hello");
        assert_eq!(extractor.extract("  no marker  "), "no marker");
    }

    #[test]
    fn invalid_regex_falls_through_to_mode() {
        let extractor =
            PayloadExtractor::from_config(&config(Some("(["), Some("after_last_pipe")));
        assert!(matches!(
            extractor,
            PayloadExtractor::Split(SplitMode::AfterLastPipe)
        ));
        assert_eq!(extractor.extract("a | b | c "), "c");
    }

    #[test]
    fn split_modes_take_text_after_last_delimiter() {
        let bracket = PayloadExtractor::Split(SplitMode::AfterLastBracket);
        assert_eq!(bracket.extract("[ECU1][APP] started"), "started");
        let colon = PayloadExtractor::Split(SplitMode::AfterLastColon);
        assert_eq!(colon.extract("no delimiter here "), "no delimiter here");
    }

    #[test]
    fn heuristic_strips_header_fields() {
        assert_eq!(
            heuristic_payload("2024-01-01 [ECU1 APP1 CTX1] - Engine started"),
            "Engine started"
        );
        assert_eq!(heuristic_payload("ECU1 | APP | log | Door open"), "Door open");
        assert_eq!(heuristic_payload("ctx: value ok"), "value ok");
        assert_eq!(heuristic_payload("ctx: ok"), "ctx: ok");
        assert_eq!(heuristic_payload("  plain\0 text "), "plain text");
    }

    #[test]
    fn unknown_mode_uses_heuristic() {
        let extractor = PayloadExtractor::from_config(&config(None, Some("sideways")));
        assert!(matches!(extractor, PayloadExtractor::Heuristic));
    }

    #[test]
    fn header_fields_come_from_colon_runs() {
        assert_eq!(
            split_header("12:00:01 x::ECU1::APP1::CTX1:: door open"),
            LineHeader {
                ecu: Some("ECU1"),
                app: Some("APP1"),
                ctx: Some("CTX1"),
            }
        );
        assert_eq!(
            split_header("ECU1:::APP1::ready"),
            LineHeader {
                ecu: Some("ECU1"),
                app: Some("APP1"),
                ctx: None,
            }
        );
        assert_eq!(split_header("svc:: up").app, Some("svc"));
        assert_eq!(split_header("plain: line"), LineHeader::default());
    }
}
