use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::PatternError;
use crate::extract::split_header;

/// Token inside a literal pattern that matches any run of characters.
pub const LITERAL_WILDCARD: &str = "***";

/// A single match pattern as written in a step document.
///
/// By default `pattern` is a regular expression matched case-sensitively
/// anywhere in the line. `literal` switches to escaped text where `***` is a
/// lazy wildcard and whitespace is flexible; `equals` requires the whole line
/// to equal the pattern. `ecu`, `app` and `ctx` additionally constrain the
/// header ids of `ECU::APP::CTX::payload` lines and are matched in the same
/// mode as the pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub literal: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_case: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub equals: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PatternSpec {
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            literal: false,
            ignore_case: false,
            equals: false,
            ecu: None,
            app: None,
            ctx: None,
        }
    }

    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            literal: true,
            ..Self::regex(pattern)
        }
    }

    /// Whole-line comparison instead of a search.
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self {
            equals: true,
            ..Self::regex(pattern)
        }
    }

    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn with_header(
        mut self,
        ecu: Option<&str>,
        app: Option<&str>,
        ctx: Option<&str>,
    ) -> Self {
        self.ecu = ecu.map(str::to_string);
        self.app = app.map(str::to_string);
        self.ctx = ctx.map(str::to_string);
        self
    }

    fn source_of(&self, text: &str) -> String {
        if self.literal {
            literal_to_regex(text)
        } else {
            text.to_string()
        }
    }

    pub fn compile(&self) -> Result<CompiledPattern, PatternError> {
        let body = self.matcher_for(&self.pattern)?;
        if let TextMatcher::Search(regex) = &body {
            let groups = regex.captures_len().saturating_sub(1);
            if groups > 1 {
                return Err(PatternError::TooManyGroups {
                    pattern: self.pattern.clone(),
                    groups,
                });
            }
        }
        let mut headers = Vec::new();
        for (field, wanted) in [
            (HeaderField::Ecu, &self.ecu),
            (HeaderField::App, &self.app),
            (HeaderField::Ctx, &self.ctx),
        ] {
            if let Some(wanted) = wanted {
                headers.push((field, self.matcher_for(wanted)?));
            }
        }
        Ok(CompiledPattern {
            spec: self.clone(),
            body,
            headers,
        })
    }

    fn matcher_for(&self, text: &str) -> Result<TextMatcher, PatternError> {
        if self.equals {
            return Ok(TextMatcher::Exact {
                text: fold(text, self.ignore_case),
                ignore_case: self.ignore_case,
            });
        }
        RegexBuilder::new(&self.source_of(text))
            .case_insensitive(self.ignore_case)
            .build()
            .map(TextMatcher::Search)
            .map_err(|err| PatternError::Compile {
                pattern: text.to_string(),
                message: err.to_string(),
            })
    }
}

impl std::fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn fold(text: &str, ignore_case: bool) -> String {
    if ignore_case {
        text.to_lowercase()
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderField {
    Ecu,
    App,
    Ctx,
}

#[derive(Debug, Clone)]
enum TextMatcher {
    Exact { text: String, ignore_case: bool },
    Search(Regex),
}

impl TextMatcher {
    fn is_match(&self, hay: &str) -> bool {
        match self {
            Self::Exact { text, ignore_case } => {
                if *ignore_case {
                    hay.to_lowercase() == *text
                } else {
                    hay == text.as_str()
                }
            }
            Self::Search(regex) => regex.is_match(hay),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    spec: PatternSpec,
    body: TextMatcher,
    headers: Vec<(HeaderField, TextMatcher)>,
}

impl CompiledPattern {
    pub fn spec(&self) -> &PatternSpec {
        &self.spec
    }

    /// Header constraints are checked first; a missing header id only
    /// matches a constraint that accepts the empty string.
    pub fn is_match(&self, text: &str) -> bool {
        if !self.headers.is_empty() {
            let header = split_header(text);
            let accepted = self.headers.iter().all(|(field, matcher)| {
                let value = match field {
                    HeaderField::Ecu => header.ecu,
                    HeaderField::App => header.app,
                    HeaderField::Ctx => header.ctx,
                };
                matcher.is_match(value.unwrap_or(""))
            });
            if !accepted {
                return false;
            }
        }
        self.body.is_match(text)
    }

    /// Text of the single capture group, when the pattern has one and it
    /// participated in the match.
    pub fn capture(&self, text: &str) -> Option<String> {
        let TextMatcher::Search(regex) = &self.body else {
            return None;
        };
        if regex.captures_len() < 2 {
            return None;
        }
        regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Converts a literal pattern into a regex: text is escaped, `***` becomes
/// `.*?`, whitespace runs become `\s+` (`\s*` next to a wildcard) and `>>`
/// tolerates any spacing.
pub fn literal_to_regex(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() * 2);
    let mut rest = literal;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix(LITERAL_WILDCARD) {
            out.push_str(".*?");
            rest = tail;
            continue;
        }
        let trimmed = rest.trim_start();
        if let Some(tail) = trimmed.strip_prefix(">>") {
            out.push_str(r"\s*>>\s*");
            rest = tail.trim_start();
            continue;
        }
        if trimmed.len() != rest.len() {
            if trimmed.starts_with(LITERAL_WILDCARD) || out.ends_with(".*?") {
                out.push_str(r"\s*");
            } else {
                out.push_str(r"\s+");
            }
            rest = trimmed;
            continue;
        }
        let mut chars = rest.chars();
        if let Some(ch) = chars.next() {
            let mut buf = [0u8; 4];
            out.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
        }
        rest = chars.as_str();
    }
    out
}
