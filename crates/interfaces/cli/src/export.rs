use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::ValueEnum;
use serde_json::{Map, Value};
use vidrank_analyzer::ScoredResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// `vidrank_<query>_<YYYYmmdd_HHMMSS>.<ext>`, with whitespace and path
/// separators in the query replaced by `_`.
pub fn export_file_name(query: &str, format: ExportFormat, now: DateTime<Local>) -> String {
    let query = query
        .chars()
        .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
        .collect::<String>();
    format!(
        "vidrank_{query}_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

/// Write `results` into `dir` and return the created file's path.
pub fn save(
    results: &[ScoredResult],
    query: &str,
    format: ExportFormat,
    dir: &Path,
) -> Result<PathBuf> {
    let body = match format {
        ExportFormat::Json => to_json(results)?,
        ExportFormat::Csv => to_csv(results)?,
    };
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export dir {}", dir.display()))?;
    let path = dir.join(export_file_name(query, format, Local::now()));
    fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn to_json(results: &[ScoredResult]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

/// One row per result; the header is every key seen, in first-seen order.
pub fn to_csv(results: &[ScoredResult]) -> Result<String> {
    let rows = results
        .iter()
        .map(|result| -> Result<Map<String, Value>> {
            match serde_json::to_value(result)? {
                Value::Object(map) => Ok(map),
                _ => Ok(Map::new()),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut header: Vec<&str> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }

    let mut out = String::new();
    push_record(&mut out, header.iter().map(|key| key.to_string()));
    for row in &rows {
        push_record(
            &mut out,
            header.iter().map(|key| match row.get(*key) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            }),
        );
    }
    Ok(out)
}

fn push_record(out: &mut String, fields: impl Iterator<Item = String>) {
    let line = fields.map(|field| quote(&field)).collect::<Vec<_>>().join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
