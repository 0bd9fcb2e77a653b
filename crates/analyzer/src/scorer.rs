use std::collections::HashSet;

use tracing::warn;

use crate::fallback::fallback;
use crate::normalize::normalize_score;
use crate::types::{AnalysisEntry, CandidateItem, ScoredResult, Scoring, sort_by_composite};

/// Blend of model relevance, audience engagement and batch-relative reach.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub relevance: f64,
    pub engagement: f64,
    pub popularity: f64,
}

impl Weights {
    pub const DEFAULT: Weights = Weights {
        relevance: 0.6,
        engagement: 0.2,
        popularity: 0.2,
    };
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn max_popularity(items: &[CandidateItem]) -> u64 {
    items.iter().map(|item| item.popularity).max().unwrap_or(0)
}

/// Views scaled onto `[0, 100]` against the largest view count in the batch.
pub(crate) fn popularity_norm(popularity: u64, max_popularity: u64) -> f64 {
    if max_popularity == 0 {
        0.0
    } else {
        100.0 * popularity as f64 / max_popularity as f64
    }
}

pub(crate) fn compose(
    item: &CandidateItem,
    relevance_score: f64,
    rationale: String,
    max_popularity: u64,
) -> ScoredResult {
    let weights = Weights::DEFAULT;
    let popularity = popularity_norm(item.popularity, max_popularity);
    let composite = weights.relevance * relevance_score
        + weights.engagement * item.engagement_ratio
        + weights.popularity * popularity;

    ScoredResult {
        item: item.clone(),
        scoring: Scoring {
            relevance_score,
            rationale,
            composite_score: round2(composite),
            engagement_contribution: round2(weights.engagement * item.engagement_ratio),
            popularity_contribution: round2(weights.popularity * popularity),
        },
    }
}

/// Turn parsed entries into ranked results.
///
/// Each candidate is scored at most once: the first entry naming an index
/// wins.  Entries pointing past the end of `items` are skipped.  Equal
/// composites keep the candidates' input order.  When nothing survives, every
/// candidate gets the neutral [`fallback`] score instead.
pub fn score(items: &[CandidateItem], entries: &[AnalysisEntry]) -> Vec<ScoredResult> {
    score_entries(items, entries).unwrap_or_else(|| {
        warn!("no usable analysis entries; using neutral scores");
        fallback(items)
    })
}

/// Like [`score`], but `None` when no entry matched a candidate.
pub fn score_entries(
    items: &[CandidateItem],
    entries: &[AnalysisEntry],
) -> Option<Vec<ScoredResult>> {
    let max_popularity = max_popularity(items);
    let mut seen = HashSet::with_capacity(entries.len());
    let mut scored = Vec::with_capacity(entries.len().min(items.len()));

    for entry in entries {
        let Some(item) = items.get(entry.index) else {
            warn!(
                index = entry.index,
                items = items.len(),
                "analysis entry index out of range; skipping"
            );
            continue;
        };
        if !seen.insert(entry.index) {
            warn!(index = entry.index, "duplicate analysis entry; keeping the first");
            continue;
        }

        scored.push((
            entry.index,
            compose(
                item,
                normalize_score(&entry.score),
                entry.rationale.clone(),
                max_popularity,
            ),
        ));
    }

    if scored.is_empty() {
        return None;
    }

    // Candidate order first so equal composites keep the input order.
    scored.sort_by_key(|(index, _)| *index);
    let mut results = scored.into_iter().map(|(_, result)| result).collect::<Vec<_>>();
    sort_by_composite(&mut results);
    Some(results)
}
