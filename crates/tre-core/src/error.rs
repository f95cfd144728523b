use std::path::PathBuf;

/// Suite-level load failure. Individual malformed steps never produce one
/// of these; they are carried as `StepKind::Invalid` entries instead.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("suite {name}: invalid JSON: {message}")]
    Json { name: String, message: String },
    #[error("suite {name}: top level must be a list of steps")]
    NotAList { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("invalid pattern {pattern:?}: {message}")]
    Compile { pattern: String, message: String },
    #[error("pattern {pattern:?} has {groups} capture groups, at most one is allowed")]
    TooManyGroups { pattern: String, groups: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encode report: {0}")]
    Encode(#[from] serde_json::Error),
}
