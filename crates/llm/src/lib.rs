use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

pub const GEMINI_API_KEY_VAR: &str = "GEMINI_API_KEY";

const GEMINI_SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Error)]
pub enum LlmError {
    /// Raised while connecting, never by `generate`.  Not worth retrying.
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} error ({status}): {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} response missing text: {body}")]
    EmptyResponse { provider: &'static str, body: String },

    #[error("{0}")]
    Unavailable(String),
}

/// A remote service that turns a prompt into free-form text.
///
/// Implementations block the calling thread until the reply (or an error)
/// arrives.
pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    fn model(&self) -> &str;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Ollama,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::Ollama => "Ollama",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Build the generator described by `settings`.
///
/// Gemini reads its key from [`GEMINI_API_KEY_VAR`]; a missing or blank key is
/// reported as [`LlmError::MissingCredential`].
pub fn connect(settings: &ClientSettings) -> Result<Box<dyn TextGenerator>, LlmError> {
    match settings.provider {
        Provider::Gemini => Ok(Box::new(GeminiClient::from_env(
            &settings.model,
            &settings.base_url,
            settings.timeout,
        )?)),
        Provider::Ollama => Ok(Box::new(OllamaClient::new(
            &settings.model,
            &settings.base_url,
            settings.timeout,
        )?)),
    }
}

// ── Gemini ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        })
    }

    pub fn from_env(model: &str, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = env::var(GEMINI_API_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(LlmError::MissingCredential(GEMINI_API_KEY_VAR))?;
        Self::new(api_key, model, base_url, timeout)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

fn gemini_payload(prompt: &str) -> Value {
    let safety = GEMINI_SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
        .collect::<Vec<_>>();

    json!({
        "contents": [
            {"role": "user", "parts": [{"text": prompt}]}
        ],
        "safetySettings": safety
    })
}

/// Concatenate the text parts of the first candidate.
fn gemini_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")
        .and_then(|candidates| candidates.get(0))
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array())?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
        .collect::<String>();

    if text.is_empty() { None } else { Some(text) }
}

fn gemini_block_reason(body: &Value) -> Option<&str> {
    body.get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(|reason| reason.as_str())
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let provider = Provider::Gemini.label();
        debug!(model = %self.model, prompt_chars = prompt.len(), "gemini generateContent");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&gemini_payload(prompt))
            .send()?;

        let status = response.status();
        let raw = response.text()?;
        if !status.is_success() {
            return Err(LlmError::Status {
                provider,
                status: status.as_u16(),
                body: raw,
            });
        }
        let body = decode_body(provider, raw)?;

        if let Some(reason) = gemini_block_reason(&body) {
            return Err(LlmError::Unavailable(format!(
                "{provider} blocked the prompt: {reason}"
            )));
        }

        gemini_text(&body).ok_or_else(|| LlmError::EmptyResponse {
            provider,
            body: body.to_string(),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn decode_body(provider: &'static str, raw: String) -> Result<Value, LlmError> {
    match serde_json::from_str(&raw) {
        Ok(body) => Ok(body),
        Err(_) => Err(LlmError::EmptyResponse { provider, body: raw }),
    }
}

// ── Ollama ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    model: String,
    base_url: String,
}

impl OllamaClient {
    pub fn new(model: &str, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            model: model.to_string(),
            base_url: base_url.to_string(),
        })
    }
}

fn ollama_text(body: &Value) -> Option<String> {
    body.get("response")
        .and_then(|value| value.as_str())
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

impl TextGenerator for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let provider = Provider::Ollama.label();
        let endpoint = format!("{}/api/generate", self.base_url.trim_end_matches('/'));

        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false
        });

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .map_err(|error| {
                LlmError::Unavailable(format!(
                    "Ollama unavailable at {}. Start Ollama and ensure model '{}' is installed. Error: {error}",
                    self.base_url, self.model
                ))
            })?;

        let status = response.status();
        let raw = response.text()?;
        if !status.is_success() {
            return Err(LlmError::Status {
                provider,
                status: status.as_u16(),
                body: raw,
            });
        }
        let body = decode_body(provider, raw)?;

        ollama_text(&body).ok_or_else(|| LlmError::EmptyResponse {
            provider,
            body: body.to_string(),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
