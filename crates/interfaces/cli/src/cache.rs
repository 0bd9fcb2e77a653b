//! On-disk cache of ranked results, one JSON file per request.
//!
//! Each file is `<dir>/<key>.json` holding `{timestamp, results}`.  Any read or
//! write problem is logged and treated as a miss; the cache never fails a run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use vidrank_analyzer::{CandidateItem, ScoredResult, Scoring};
use vidrank_config::CacheConfig;

/// Inputs that identify a ranking request.
#[derive(Debug, Clone)]
pub struct CacheKey<'a> {
    pub query: &'a str,
    pub input_path: &'a Path,
    /// Raw bytes of the candidate file, so edits invalidate old entries.
    pub input: &'a [u8],
    pub limit: usize,
    pub model: &'a str,
}

impl CacheKey<'_> {
    pub fn digest(&self) -> String {
        let content = format!("{:x}", Sha256::digest(self.input));
        let path = self.input_path.display().to_string();
        let limit = self.limit.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.query,
            path.as_str(),
            content.as_str(),
            limit.as_str(),
            self.model,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Serialize, Deserialize)]
struct CachedResult {
    item: CandidateItem,
    scoring: Scoring,
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    timestamp: i64,
    results: Vec<CachedResult>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanReport {
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
    max_age: Duration,
    max_size_bytes: u64,
}

impl ResultCache {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            ttl: Duration::from_secs(config.ttl_secs),
            max_age: Duration::from_secs(config.max_age_days.saturating_mul(86_400)),
            max_size_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Fresh results for `key`, or `None` on a miss.
    pub fn load(&self, key: &str) -> Option<Vec<ScoredResult>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }
        let envelope = match read_envelope(&path) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(path = %path.display(), ?err, "unreadable cache entry");
                return None;
            }
        };

        let age = Utc::now().timestamp().saturating_sub(envelope.timestamp);
        if age < 0 || age as u64 >= self.ttl.as_secs() {
            debug!(key, age, "cache entry expired");
            return None;
        }
        info!(key, "using cached results");
        Some(
            envelope
                .results
                .into_iter()
                .map(|cached| ScoredResult {
                    item: cached.item,
                    scoring: cached.scoring,
                })
                .collect(),
        )
    }

    pub fn store(&self, key: &str, results: &[ScoredResult]) {
        let envelope = CacheEnvelope {
            timestamp: Utc::now().timestamp(),
            results: results
                .iter()
                .map(|result| CachedResult {
                    item: result.item.clone(),
                    scoring: result.scoring.clone(),
                })
                .collect(),
        };
        let path = self.entry_path(key);
        if let Err(err) = write_envelope(&self.dir, &path, &envelope) {
            warn!(path = %path.display(), ?err, "failed to save cache entry");
        }
    }

    /// Delete entries older than `max_age`, then the oldest remaining ones
    /// until the directory fits in `max_size_bytes`.
    pub fn clean(&self) -> Result<CleanReport> {
        if !self.dir.exists() {
            return Ok(CleanReport::default());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read cache dir {}", self.dir.display()))?
        {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                files.push(CacheFile {
                    path: entry.path(),
                    size: metadata.len(),
                    modified: metadata.modified()?,
                });
            }
        }

        let plan = plan_cleanup(files, SystemTime::now(), self.max_age, self.max_size_bytes);
        for path in plan.expired.iter().chain(&plan.evicted) {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
        }
        Ok(CleanReport {
            expired: plan.expired.len(),
            evicted: plan.evicted.len(),
        })
    }
}

fn read_envelope(path: &Path) -> Result<CacheEnvelope> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_envelope(dir: &Path, path: &Path, envelope: &CacheEnvelope) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(path, serde_json::to_string(envelope)?)?;
    Ok(())
}

#[derive(Debug, Clone)]
struct CacheFile {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct CleanupPlan {
    expired: Vec<PathBuf>,
    evicted: Vec<PathBuf>,
}

fn plan_cleanup(
    files: Vec<CacheFile>,
    now: SystemTime,
    max_age: Duration,
    max_size_bytes: u64,
) -> CleanupPlan {
    let mut plan = CleanupPlan::default();
    let mut kept = Vec::new();
    for file in files {
        let age = now.duration_since(file.modified).unwrap_or_default();
        if age > max_age {
            plan.expired.push(file.path);
        } else {
            kept.push(file);
        }
    }

    let mut total: u64 = kept.iter().map(|file| file.size).sum();
    kept.sort_by_key(|file| file.modified);
    for file in kept {
        if total <= max_size_bytes {
            break;
        }
        total -= file.size;
        plan.evicted.push(file.path);
    }
    plan
}

// ── Tests ────────────────────────────────────────────────────────────────────
