//! Append-only record of raw model replies and parse failures.
//!
//! Debug-only: nothing reads this file back, and a failed write never changes
//! what [`crate::Analyzer::analyze`] returns.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

const SEPARATOR_WIDTH: usize = 50;

#[derive(Debug, Clone)]
pub struct ResponseLog {
    path: Option<PathBuf>,
    char_cap: usize,
}

impl ResponseLog {
    pub fn new(path: impl Into<PathBuf>, char_cap: usize) -> Self {
        Self {
            path: Some(path.into()),
            char_cap,
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            char_cap: 0,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn response(&self, body: &str) {
        self.append("Response", body);
    }

    pub fn error(&self, reason: &str, body: &str) {
        self.append(&format!("ERROR: {reason}"), body);
    }

    fn append(&self, tag: &str, body: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = write_entry(path, &render_entry(tag, body, self.char_cap)) {
            warn!(path = %path.display(), ?err, "failed to write response log");
        }
    }
}

fn render_entry(tag: &str, body: &str, char_cap: usize) -> String {
    let truncated = body.chars().take(char_cap).collect::<String>();
    format!(
        "\n[{}] {tag}:\n{truncated}\n{}\n",
        Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
        "=".repeat(SEPARATOR_WIDTH)
    )
}

fn write_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.as_bytes())?;
    file.flush()
}
