//! Records flowing through the scoring pipeline.
//!
//! A [`CandidateItem`] comes from the search side and is never mutated.  The
//! scorer pairs it with a [`Scoring`] to form a [`ScoredResult`], which
//! serializes flat so exports carry every original field next to the computed
//! ones.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const NO_RATIONALE: &str = "No rationale provided";

/// One video returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub title: String,
    /// Likes over views, as a percentage in `[0, 100]`.
    #[serde(default, alias = "like_ratio")]
    pub engagement_ratio: f64,
    /// Raw view count.
    #[serde(default, alias = "views")]
    pub popularity: u64,
    /// Human-readable view count (`"1.2M"`), shown in the prompt.
    #[serde(default, alias = "views_formatted")]
    pub popularity_formatted: String,
    /// Everything else the search side attached (url, channel, duration, …).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CandidateItem {
    pub fn new(title: impl Into<String>, engagement_ratio: f64, popularity: u64) -> Self {
        Self {
            title: title.into(),
            engagement_ratio,
            popularity,
            popularity_formatted: popularity.to_string(),
            extra: Map::new(),
        }
    }

    /// Look up a passthrough string field such as `url` or `channel`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// A single per-item verdict recovered from the model's reply.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisEntry {
    /// 0-based position in the candidate list the prompt was built from.
    pub index: usize,
    /// Left untyped; [`crate::normalize_score`] decides what it is worth.
    pub score: Value,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoring {
    pub relevance_score: f64,
    pub rationale: String,
    pub composite_score: f64,
    pub engagement_contribution: f64,
    pub popularity_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    #[serde(flatten)]
    pub item: CandidateItem,
    #[serde(flatten)]
    pub scoring: Scoring,
}

impl ScoredResult {
    pub fn composite_score(&self) -> f64 {
        self.scoring.composite_score
    }
}

/// Stable sort, highest composite first.
pub(crate) fn sort_by_composite(results: &mut [ScoredResult]) {
    results.sort_by(|a, b| b.composite_score().total_cmp(&a.composite_score()));
}
