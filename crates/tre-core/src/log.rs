use std::path::Path;

use crate::error::LoadError;
use crate::model::LogLine;

/// Splits raw bytes into lines, decoding lossily and dropping the `\r` of
/// CRLF endings. A missing final newline still yields the last line.
pub fn split_log(bytes: &[u8]) -> Vec<LogLine> {
    if bytes.is_empty() {
        return Vec::new();
    }
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    LogLine::numbered(body.split(|b| *b == b'\n').map(|part| {
        String::from_utf8_lossy(part)
            .trim_end_matches('\r')
            .to_string()
    }))
}

pub fn read_log(path: &Path) -> Result<Vec<LogLine>, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(split_log(&bytes))
}
