use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── LLM provider ──────────────────────────────────────────────────────────────

/// Which remote service scores candidate titles.
///
/// | Provider | Endpoint                                   | Credential        |
/// |----------|--------------------------------------------|-------------------|
/// | `gemini` | `generativelanguage.googleapis.com`        | `GEMINI_API_KEY`  |
/// | `ollama` | local Ollama server (`ollama_base_url`)    | none              |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub ollama_model: String,
    /// Base URL for the Ollama API.  Overridden at runtime by the
    /// `OLLAMA_BASE_URL` environment variable when set.
    pub ollama_base_url: String,
    /// Per-request timeout applied to every scoring call.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            ollama_model: "llama3.1:8b".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            request_timeout_secs: 60,
        }
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Remote scoring attempts per `analyze` call before falling back to
    /// neutral scores.
    pub max_attempts: u32,
    /// Minimum spacing between two outbound scoring calls.
    pub rate_limit_ms: u64,
    /// Backoff after failed attempt `n` (0-based) is `backoff_base_ms * 2^n`.
    pub backoff_base_ms: u64,
    /// Titles are cut to this many characters inside the prompt.
    pub title_char_cap: usize,
    /// Upper bound on candidates sent in a single prompt.
    pub max_candidates: usize,
    /// Append-only diagnostic log of raw model responses and parse failures.
    /// Empty string disables the log.
    pub response_log_path: String,
    /// Response bodies are truncated to this many characters in the log.
    pub response_log_char_cap: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_ms: 1200,
            backoff_base_ms: 1000,
            title_char_cap: 100,
            max_candidates: 50,
            response_log_path: "logs/responses.log".to_string(),
            response_log_char_cap: 2000,
        }
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// How many candidates are analysed and shown.
    pub max_results: usize,
    pub show_description: bool,
    /// Directory that `--save` exports are written into.
    pub export_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            show_description: false,
            export_dir: ".".to_string(),
        }
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: String,
    /// Cached result sets older than this are treated as misses.
    pub ttl_secs: u64,
    /// `cache clean` deletes the oldest files until the directory fits.
    pub max_size_mb: u64,
    /// `cache clean` deletes files older than this unconditionally.
    pub max_age_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: ".cache".to_string(),
            ttl_secs: 3600,
            max_size_mb: 50,
            max_age_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub analysis: AnalysisConfig,
    pub output: OutputConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        config.apply_overrides(
            env::var("OLLAMA_BASE_URL").ok(),
            env::var("VIDRANK_MODEL").ok(),
        );
        Ok(config)
    }

    /// `OLLAMA_BASE_URL` switches to Ollama; `VIDRANK_MODEL` then replaces the
    /// active provider's model.  Blank values are ignored.
    pub fn apply_overrides(&mut self, ollama_base_url: Option<String>, model: Option<String>) {
        if let Some(url) = ollama_base_url.filter(|url| !url.is_empty()) {
            self.llm.provider = ProviderKind::Ollama;
            self.llm.ollama_base_url = url;
        }

        if let Some(model) = model.filter(|model| !model.trim().is_empty()) {
            match self.llm.provider {
                ProviderKind::Gemini => self.llm.gemini_model = model,
                ProviderKind::Ollama => self.llm.ollama_model = model,
            }
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    pub fn active_model(&self) -> &str {
        match self.llm.provider {
            ProviderKind::Gemini => &self.llm.gemini_model,
            ProviderKind::Ollama => &self.llm.ollama_model,
        }
    }

    pub fn active_base_url(&self) -> &str {
        match self.llm.provider {
            ProviderKind::Gemini => &self.llm.gemini_base_url,
            ProviderKind::Ollama => &self.llm.ollama_base_url,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── Scoring-critical defaults ──────────────────────────────────────────
    // The retry cap and spacing protect the remote quota. Changing any of
    // these values should be a deliberate, reviewed decision.

    #[test]
    fn analysis_defaults_match_retry_and_rate_limit_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.analysis.max_attempts, 3, "three attempts per call");
        assert_eq!(cfg.analysis.rate_limit_ms, 1200, "1.2s between calls");
        assert_eq!(cfg.analysis.backoff_base_ms, 1000);
        assert_eq!(cfg.analysis.title_char_cap, 100);
        assert_eq!(cfg.analysis.response_log_char_cap, 2000);
        assert_eq!(cfg.analysis.max_candidates, 50);
    }

    #[test]
    fn cosmetic_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, ProviderKind::Gemini);
        assert_eq!(cfg.llm.gemini_model, "gemini-2.0-flash");
        assert_eq!(cfg.llm.ollama_base_url, "http://localhost:11434");
        assert_eq!(cfg.llm.request_timeout_secs, 60);
        assert_eq!(cfg.output.max_results, 20);
        assert!(!cfg.output.show_description);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.ttl_secs, 3600);
        assert_eq!(cfg.cache.max_size_mb, 50);
        assert_eq!(cfg.cache.max_age_days, 7);
        assert_eq!(cfg.telemetry.log_level, "info");
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.analysis.max_attempts, 3);
        assert_eq!(cfg.output.max_results, 20);
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[llm]
provider = "gemini"
gemini_model = "gemini-1.5-pro"
request_timeout_secs = 15

[analysis]
max_attempts = 5
rate_limit_ms = 250
response_log_path = ""

[output]
max_results = 7
show_description = true

[cache]
enabled = false
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.llm.gemini_model, "gemini-1.5-pro");
        assert_eq!(cfg.llm.request_timeout_secs, 15);
        assert_eq!(cfg.analysis.max_attempts, 5);
        assert_eq!(cfg.analysis.rate_limit_ms, 250);
        assert!(cfg.analysis.response_log_path.is_empty());
        assert_eq!(cfg.output.max_results, 7);
        assert!(cfg.output.show_description);
        assert!(!cfg.cache.enabled);
        // Unspecified keys keep their defaults
        assert_eq!(cfg.analysis.backoff_base_ms, 1000);
        assert_eq!(cfg.cache.dir, ".cache");
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[output]
max_results = 3
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.output.max_results, 3);
        assert_eq!(cfg.analysis.title_char_cap, 100);
        assert_eq!(cfg.cache.ttl_secs, 3600);
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn load_from_unknown_provider_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("provider.toml");
        fs::write(&path, "[llm]\nprovider = \"carrier-pigeon\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.llm.provider = ProviderKind::Ollama;
        cfg.llm.ollama_model = "qwen2.5:7b".to_string();
        cfg.analysis.max_attempts = 4;
        cfg.cache.dir = "/tmp/vidrank-cache".to_string();

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.llm.provider, ProviderKind::Ollama);
        assert_eq!(loaded.llm.ollama_model, "qwen2.5:7b");
        assert_eq!(loaded.analysis.max_attempts, 4);
        assert_eq!(loaded.cache.dir, "/tmp/vidrank-cache");
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/config.toml");
        let cfg = AppConfig::default();
        cfg.save_to(&path).unwrap();
        assert!(path.exists());
    }

    // ── active_model ───────────────────────────────────────────────────────

    #[test]
    fn active_model_returns_gemini_by_default() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.active_model(), "gemini-2.0-flash");
        assert_eq!(
            cfg.active_base_url(),
            "https://generativelanguage.googleapis.com"
        );
    }

    #[test]
    fn active_model_follows_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = ProviderKind::Ollama;
        assert_eq!(cfg.active_model(), "llama3.1:8b");
        assert_eq!(cfg.active_base_url(), "http://localhost:11434");
    }

    // ── ProviderKind serde ─────────────────────────────────────────────────

    #[test]
    fn provider_kind_serializes_lowercase() {
        for (kind, label) in [
            (ProviderKind::Gemini, "\"gemini\""),
            (ProviderKind::Ollama, "\"ollama\""),
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, label);
        }
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    #[test]
    fn env_overrides_switch_provider_and_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[llm]
provider = "gemini"
"#,
        )
        .unwrap();

        let mut cfg = AppConfig::load_from(&path).unwrap();
        cfg.apply_overrides(
            Some("http://gpu-box:11434".to_string()),
            Some("mistral:7b".to_string()),
        );

        assert_eq!(cfg.llm.provider, ProviderKind::Ollama);
        assert_eq!(cfg.llm.ollama_base_url, "http://gpu-box:11434");
        assert_eq!(cfg.llm.ollama_model, "mistral:7b");
        // The inactive provider's model is untouched.
        assert_eq!(cfg.llm.gemini_model, "gemini-2.0-flash");
    }

    #[test]
    fn model_override_targets_the_configured_provider() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = ProviderKind::Gemini;
        cfg.apply_overrides(None, Some("gemini-1.5-pro".to_string()));

        assert_eq!(cfg.llm.provider, ProviderKind::Gemini);
        assert_eq!(cfg.llm.gemini_model, "gemini-1.5-pro");
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let mut cfg = AppConfig::default();
        let before = cfg.llm.clone();
        cfg.apply_overrides(Some(String::new()), Some("   ".to_string()));

        assert_eq!(cfg.llm.provider, before.provider);
        assert_eq!(cfg.llm.ollama_base_url, before.ollama_base_url);
        assert_eq!(cfg.llm.gemini_model, before.gemini_model);
        assert_eq!(cfg.llm.ollama_model, before.ollama_model);
    }
}
