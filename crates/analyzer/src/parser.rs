//! Recover per-item verdicts from free-form model output.
//!
//! Models are asked for bare JSON but routinely wrap it in markdown fences,
//! use single quotes, leave trailing commas or get cut off mid-array.  Each
//! [`Strategy`] is a pure `&str -> Result<Vec<Value>, StrategyError>` and
//! [`parse`] tries them in [`Strategy::ORDER`], stopping at the first one that
//! produces a non-empty `analysis` list.  Only text that fails to decode moves
//! the cascade on; a document that decodes without a usable `analysis` list
//! ends it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{AnalysisEntry, NO_RATIONALE};

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// A `{...}` span with no nested braces that mentions an integer `index`.
static FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{[^{}]*["']index["']\s*:\s*\d+[^{}]*\}"#).expect("fragment pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The whole trimmed reply is the document.
    Direct,
    /// The document sits inside a ```` ```json ```` fence.
    Fenced,
    /// Quote/comment/comma repair, then first `{` to last `}`.
    Repaired,
    /// Salvage individual `{"index": ...}` objects.
    Fragments,
}

impl Strategy {
    pub const ORDER: [Strategy; 4] = [
        Strategy::Direct,
        Strategy::Fenced,
        Strategy::Repaired,
        Strategy::Fragments,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Fenced => "fenced",
            Strategy::Repaired => "repaired",
            Strategy::Fragments => "fragments",
        }
    }

    /// Raw elements of the `analysis` list, or why this strategy gave up.
    pub fn extract(self, text: &str) -> Result<Vec<Value>, StrategyError> {
        match self {
            Strategy::Direct => decode_document(text.trim()),
            Strategy::Fenced => decode_document(fenced_block(text)?),
            Strategy::Repaired => {
                let object = outer_object(text).ok_or(StrategyError::NoObject)?;
                let repaired = repair_json(object);
                decode_document(outer_object(&repaired).ok_or(StrategyError::NoObject)?)
            }
            Strategy::Fragments => recover_fragments(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("no ```json fenced block")]
    NoFence,
    #[error("no brace-delimited object")]
    NoObject,
    #[error("missing or invalid 'analysis' field")]
    Shape,
    #[error("'analysis' list is empty")]
    Empty,
    #[error("no decodable fragment with an \"index\" key")]
    NoFragments,
}

impl StrategyError {
    /// The text decoded, so later strategies would only see the same document.
    pub fn is_final(&self) -> bool {
        matches!(self, StrategyError::Shape | StrategyError::Empty)
    }
}

impl From<serde_json::Error> for StrategyError {
    fn from(err: serde_json::Error) -> Self {
        StrategyError::Json(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry is not an object")]
    NotObject,
    #[error("invalid index: {0}")]
    InvalidIndex(String),
    #[error("index {index} out of range for {item_count} items")]
    OutOfRange { index: usize, item_count: usize },
}

/// No strategy produced an `analysis` list; one reason per strategy tried, in
/// cascade order.  The last reason is final when the reply decoded but had the
/// wrong shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no usable analysis list after {} parsing strategies", .attempts.len())]
pub struct ParseError {
    pub attempts: Vec<(Strategy, StrategyError)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub strategy: Strategy,
    /// Valid entries, in the order the model emitted them.
    pub entries: Vec<AnalysisEntry>,
    /// Elements of the winning list that were dropped individually.
    pub rejected: usize,
    /// Strategies tried before the winner, with their failure reasons.
    pub failed_attempts: Vec<(Strategy, StrategyError)>,
}

/// Run the cascade against `raw`.
///
/// A decoded document without a non-empty `analysis` list stops the cascade
/// with an error.  The first strategy yielding a non-empty list wins even when
/// every one of its elements is individually invalid; in that case `entries`
/// is empty and the caller falls back to neutral scores.
pub fn parse(raw: &str, item_count: usize) -> Result<ParsedResponse, ParseError> {
    let mut failed_attempts = Vec::new();

    for strategy in Strategy::ORDER {
        let elements = match strategy.extract(raw) {
            Ok(elements) => elements,
            Err(err) => {
                debug!(strategy = strategy.label(), %err, "parse strategy failed");
                let stop = err.is_final();
                failed_attempts.push((strategy, err));
                if stop {
                    break;
                }
                continue;
            }
        };

        let mut entries = Vec::with_capacity(elements.len());
        let mut rejected = 0;
        for element in &elements {
            match decode_entry(element, item_count) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    rejected += 1;
                    warn!(strategy = strategy.label(), %err, "skipping analysis entry");
                }
            }
        }

        debug!(
            strategy = strategy.label(),
            accepted = entries.len(),
            rejected,
            "parsed model response"
        );
        return Ok(ParsedResponse {
            strategy,
            entries,
            rejected,
            failed_attempts,
        });
    }

    Err(ParseError {
        attempts: failed_attempts,
    })
}

pub fn decode_entry(value: &Value, item_count: usize) -> Result<AnalysisEntry, EntryError> {
    let object = value.as_object().ok_or(EntryError::NotObject)?;

    let index = match object.get("index") {
        Some(raw) => raw
            .as_u64()
            .and_then(|index| usize::try_from(index).ok())
            .ok_or_else(|| EntryError::InvalidIndex(raw.to_string()))?,
        None => return Err(EntryError::InvalidIndex("missing".to_string())),
    };
    if index >= item_count {
        return Err(EntryError::OutOfRange { index, item_count });
    }

    let rationale = object
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or(NO_RATIONALE)
        .to_string();

    Ok(AnalysisEntry {
        index,
        score: object.get("score").cloned().unwrap_or(Value::Null),
        rationale,
    })
}

// ── Strategy helpers ─────────────────────────────────────────────────────────

/// Decode `text` and pull out a non-empty `analysis` array.
fn decode_document(text: &str) -> Result<Vec<Value>, StrategyError> {
    let document: Value = serde_json::from_str(text)?;
    match document {
        Value::Object(mut fields) => match fields.remove("analysis") {
            Some(Value::Array(elements)) if elements.is_empty() => Err(StrategyError::Empty),
            Some(Value::Array(elements)) => Ok(elements),
            _ => Err(StrategyError::Shape),
        },
        _ => Err(StrategyError::Shape),
    }
}

fn fenced_block(text: &str) -> Result<&str, StrategyError> {
    let fence_start = text.find(JSON_FENCE).ok_or(StrategyError::NoFence)?;
    let after_fence = &text[fence_start + JSON_FENCE.len()..];
    let body_start = after_fence
        .find(|c: char| !c.is_whitespace())
        .ok_or(StrategyError::NoFence)?;
    let body = &after_fence[body_start..];
    let fence_end = body.find(FENCE).ok_or(StrategyError::NoFence)?;
    Ok(body[..fence_end].trim())
}

/// Slice from the first `{` to the last `}` inclusive.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn recover_fragments(text: &str) -> Result<Vec<Value>, StrategyError> {
    let fragments = FRAGMENT_RE
        .find_iter(text)
        .filter_map(|found| decode_fragment(found.as_str()))
        .collect::<Vec<_>>();

    if fragments.is_empty() {
        Err(StrategyError::NoFragments)
    } else {
        Ok(fragments)
    }
}

fn decode_fragment(fragment: &str) -> Option<Value> {
    let value = serde_json::from_str::<Value>(fragment)
        .or_else(|_| serde_json::from_str::<Value>(&repair_json(fragment)))
        .ok()?;
    value.is_object().then_some(value)
}

// ── Repair pass ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Quoting {
    None,
    Double,
    Single,
}

/// Best-effort cleanup of JSON-ish text.
///
/// Outside string literals: single-quoted strings become double-quoted, `//`
/// comments are dropped up to the end of the line, and a comma whose next
/// significant character is `}` or `]` is removed.  Inside a single-quoted
/// string a `'` only terminates it when followed by `,` `:` `}` `]` or the end
/// of input, so apostrophes in prose survive.
pub fn repair_json(text: &str) -> String {
    let chars = text.chars().collect::<Vec<_>>();
    let mut out = String::with_capacity(text.len());
    let mut quoting = Quoting::None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match quoting {
            Quoting::Double => {
                out.push(c);
                if c == '\\' {
                    if let Some(&escaped) = chars.get(i + 1) {
                        out.push(escaped);
                        i += 1;
                    }
                } else if c == '"' {
                    quoting = Quoting::None;
                }
            }
            Quoting::Single => match c {
                '\\' => match chars.get(i + 1) {
                    Some('\'') => {
                        out.push('\'');
                        i += 1;
                    }
                    Some(&escaped) => {
                        out.push('\\');
                        out.push(escaped);
                        i += 1;
                    }
                    None => out.push('\\'),
                },
                '"' => out.push_str("\\\""),
                '\'' if closes_single_quote(&chars, i + 1) => {
                    out.push('"');
                    quoting = Quoting::None;
                }
                _ => out.push(c),
            },
            Quoting::None => match c {
                '"' => {
                    out.push(c);
                    quoting = Quoting::Double;
                }
                '\'' => {
                    out.push('"');
                    quoting = Quoting::Single;
                }
                '/' if chars.get(i + 1) == Some(&'/') => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                ',' if matches!(next_significant(&chars, i + 1), Some('}' | ']')) => {}
                _ => out.push(c),
            },
        }
        i += 1;
    }

    out
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|c| !c.is_whitespace())
}

fn closes_single_quote(chars: &[char], from: usize) -> bool {
    matches!(
        next_significant(chars, from),
        None | Some(',' | ':' | '}' | ']')
    )
}

// ── Tests ────────────────────────────────────────────────────────────────────
