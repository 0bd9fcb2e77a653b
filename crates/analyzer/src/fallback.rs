use crate::normalize::NEUTRAL_SCORE;
use crate::scorer::{compose, max_popularity};
use crate::types::{CandidateItem, ScoredResult, sort_by_composite};

pub const FALLBACK_RATIONALE: &str = "Could not analyze content";

/// Neutral relevance for every candidate; engagement and popularity still
/// count, so the ranking degrades to a reach/engagement ordering.
pub fn fallback(items: &[CandidateItem]) -> Vec<ScoredResult> {
    let max_popularity = max_popularity(items);
    let mut results = items
        .iter()
        .map(|item| {
            compose(
                item,
                NEUTRAL_SCORE,
                FALLBACK_RATIONALE.to_string(),
                max_popularity,
            )
        })
        .collect::<Vec<_>>();
    sort_by_composite(&mut results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_neutral_result_per_item() {
        let items = vec![
            CandidateItem::new("a", 40.0, 10),
            CandidateItem::new("b", 90.0, 100),
            CandidateItem::new("c", 0.0, 0),
        ];
        let results = fallback(&items);

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.scoring.relevance_score == 50.0));
        assert!(results.iter().all(|r| r.scoring.rationale == FALLBACK_RATIONALE));

        // 30 + 18 + 20
        assert_eq!(results[0].item.title, "b");
        assert_eq!(results[0].scoring.composite_score, 68.0);
        // 30 + 8 + 2
        assert_eq!(results[1].item.title, "a");
        assert_eq!(results[1].scoring.composite_score, 40.0);
        assert_eq!(results[2].scoring.composite_score, 30.0);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        assert!(fallback(&[]).is_empty());
    }

    #[test]
    fn equal_items_keep_input_order() {
        let items = vec![CandidateItem::new("first", 0.0, 0), CandidateItem::new("second", 0.0, 0)];
        let results = fallback(&items);
        assert_eq!(results[0].item.title, "first");
        assert_eq!(results[1].item.title, "second");
    }
}
