use std::io::Write;
use std::path::{Path, PathBuf};

use tre_core::report::{renderer_for, RenderOptions};
use tre_core::Report;

/// Where and how reports of one command are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTarget {
    pub out_dir: PathBuf,
    pub formats: Vec<String>,
    pub options: RenderOptions,
}

impl ReportTarget {
    pub fn validate(&self) -> Result<(), String> {
        for format in &self.formats {
            if renderer_for(format).is_none() {
                return Err(format!("unknown report format: {format}"));
            }
        }
        Ok(())
    }

    /// Writes one file per format and lists them on `out`.
    pub fn write(&self, report: &Report, out: &mut dyn Write) -> Result<Vec<PathBuf>, String> {
        let mut written = Vec::new();
        for format in &self.formats {
            let Some(renderer) = renderer_for(format) else {
                return Err(format!("unknown report format: {format}"));
            };
            let path = renderer
                .render(report, Path::new(&self.out_dir), &self.options)
                .map_err(|err| format!("write {format} report: {err}"))?;
            tracing::info!("wrote {}", path.display());
            let _ = writeln!(out, "report: {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

pub fn generator_info() -> String {
    format!("tre {}", env!("CARGO_PKG_VERSION"))
}
