use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

/// Plain-text per-call audit trail (`<workDir>/log.txt`).
///
/// Writes never fail the caller: errors are reported to tracing and dropped.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    call_id: String,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, call_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            call_id: call_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!(call_id = %self.call_id, "{message}");

        let line = format!(
            "{} - [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            self.call_id,
            message
        );
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = written {
            tracing::debug!(path = %self.path.display(), "Audit write dropped: {e}");
        }
    }
}
