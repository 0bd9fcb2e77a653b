use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use vidrank_config::AnalysisConfig;
use vidrank_llm::{LlmError, TextGenerator};

use crate::diagnostics::ResponseLog;
use crate::fallback::fallback;
use crate::parser::{Strategy, parse};
use crate::prompt::build_prompt;
use crate::rate_limit::RateLimiter;
use crate::scorer::score_entries;
use crate::types::{CandidateItem, ScoredResult};

/// Builds the scoring model on first use.
pub type Connector = Box<dyn FnMut() -> Result<Box<dyn TextGenerator>, LlmError>>;

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub max_attempts: u32,
    /// Delay after failed attempt `n` (0-based) is `backoff_base * 2^n`.
    pub backoff_base: Duration,
    pub title_char_cap: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for AnalysisSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            title_char_cap: config.title_char_cap,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The scoring model could not be set up (e.g. missing API key).
    #[error("failed to configure scoring model: {0}")]
    Configuration(#[source] LlmError),
}

/// How an [`Analysis`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The model's verdicts, recovered by this strategy.
    Ranked(Strategy),
    NoCandidates,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    RetriesExhausted,
    /// The reply held no usable `analysis` list.
    Unparseable,
    /// The list parsed but no entry matched a candidate.
    NoUsableEntries,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub results: Vec<ScoredResult>,
    pub outcome: Outcome,
}

impl Analysis {
    /// Whether `results` carry the model's own verdicts rather than neutral
    /// scores.
    pub fn is_ranked(&self) -> bool {
        matches!(self.outcome, Outcome::Ranked(_))
    }
}

/// Scores candidate lists against a query with a remote model.
///
/// One `analyze` call walks `Configuring (first call only) → Attempting 1..n`
/// and ends in either a parsed result set or the neutral fallback.  Only a
/// configuration failure surfaces as an error; remote and parse failures
/// always degrade to [`fallback`].
pub struct Analyzer {
    settings: AnalysisSettings,
    limiter: RateLimiter,
    log: ResponseLog,
    connector: Connector,
    generator: Option<Box<dyn TextGenerator>>,
}

impl Analyzer {
    pub fn new(
        settings: AnalysisSettings,
        limiter: RateLimiter,
        log: ResponseLog,
        connector: impl FnMut() -> Result<Box<dyn TextGenerator>, LlmError> + 'static,
    ) -> Self {
        Self {
            settings,
            limiter,
            log,
            connector: Box::new(connector),
            generator: None,
        }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn is_configured(&self) -> bool {
        self.generator.is_some()
    }

    /// Rank `items` for `query`.
    ///
    /// Returns at most one result per item, sorted by composite score. Empty
    /// input returns immediately without touching the model.
    pub fn analyze(
        &mut self,
        items: &[CandidateItem],
        query: &str,
    ) -> Result<Vec<ScoredResult>, AnalysisError> {
        Ok(self.evaluate(items, query)?.results)
    }

    /// [`Analyzer::analyze`], also reporting whether the model's verdicts or
    /// the neutral fallback produced the results.
    pub fn evaluate(
        &mut self,
        items: &[CandidateItem],
        query: &str,
    ) -> Result<Analysis, AnalysisError> {
        if items.is_empty() {
            return Ok(Analysis {
                results: Vec::new(),
                outcome: Outcome::NoCandidates,
            });
        }

        let generator = match self.generator.take() {
            Some(generator) => generator,
            None => {
                info!("configuring scoring model");
                let generator = (self.connector)().map_err(AnalysisError::Configuration)?;
                info!(model = generator.model(), "scoring model configured");
                generator
            }
        };
        let generator = &**self.generator.insert(generator);

        let prompt = build_prompt(items, query, self.settings.title_char_cap);
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 0..max_attempts {
            self.limiter.acquire();
            match generator.generate(&prompt) {
                Ok(text) => {
                    self.log.response(&text);
                    return Ok(score_response(items, &text, &self.log));
                }
                Err(err) => {
                    let reason = format!("Attempt {}/{max_attempts}: {err}", attempt + 1);
                    self.log.error(&reason, &format!("Error: {err}"));
                    warn!(attempt = attempt + 1, max_attempts, %err, "scoring call failed");

                    if attempt + 1 < max_attempts {
                        let delay = self
                            .settings
                            .backoff_base
                            .saturating_mul(2u32.saturating_pow(attempt));
                        thread::sleep(delay);
                    }
                }
            }
        }

        warn!(max_attempts, "max retries reached; using neutral scores");
        Ok(fallen_back(items, FallbackReason::RetriesExhausted))
    }
}

fn fallen_back(items: &[CandidateItem], reason: FallbackReason) -> Analysis {
    Analysis {
        results: fallback(items),
        outcome: Outcome::Fallback(reason),
    }
}

fn score_response(items: &[CandidateItem], text: &str, log: &ResponseLog) -> Analysis {
    match parse(text, items.len()) {
        Ok(parsed) => {
            for (strategy, err) in &parsed.failed_attempts {
                log.error(&format!("{} parse failed: {err}", strategy.label()), text);
            }
            if parsed.entries.is_empty() {
                log.error(
                    &format!(
                        "Invalid analysis: all {} entries rejected",
                        parsed.rejected
                    ),
                    text,
                );
            }
            info!(
                strategy = parsed.strategy.label(),
                entries = parsed.entries.len(),
                rejected = parsed.rejected,
                "model response parsed"
            );
            match score_entries(items, &parsed.entries) {
                Some(results) => Analysis {
                    results,
                    outcome: Outcome::Ranked(parsed.strategy),
                },
                None => {
                    warn!("no usable analysis entries; using neutral scores");
                    fallen_back(items, FallbackReason::NoUsableEntries)
                }
            }
        }
        Err(err) => {
            for (strategy, reason) in &err.attempts {
                log.error(&format!("{} parse failed: {reason}", strategy.label()), text);
            }
            warn!(%err, "using neutral scores");
            fallen_back(items, FallbackReason::Unparseable)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FALLBACK_RATIONALE;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::fs;
    use std::rc::Rc;
    use std::time::Instant;
    use tempfile::TempDir;

    // ── Scripted model ─────────────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct ScriptedModel {
        replies: Rc<RefCell<VecDeque<Result<String, LlmError>>>>,
        prompts: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedModel {
        fn with_replies(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Rc::new(RefCell::new(replies.into())),
                prompts: Rc::default(),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.borrow().len()
        }
    }

    impl TextGenerator for ScriptedModel {
        fn generate(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::Unavailable("script exhausted".to_string())))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn quota_error() -> LlmError {
        LlmError::Status {
            provider: "Gemini",
            status: 429,
            body: "quota".to_string(),
        }
    }

    fn fast_settings() -> AnalysisSettings {
        AnalysisSettings {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            title_char_cap: 100,
        }
    }

    fn analyzer_for(model: &ScriptedModel) -> (Analyzer, Rc<Cell<usize>>) {
        let connects = Rc::new(Cell::new(0));
        let counter = connects.clone();
        let model = model.clone();
        let analyzer = Analyzer::new(
            fast_settings(),
            RateLimiter::new(Duration::from_millis(1)),
            ResponseLog::disabled(),
            move || {
                counter.set(counter.get() + 1);
                Ok(Box::new(model.clone()) as Box<dyn TextGenerator>)
            },
        );
        (analyzer, connects)
    }

    fn items() -> Vec<CandidateItem> {
        vec![
            CandidateItem::new("Python Tutorial for Beginners 2025", 95.5, 1_200_000),
            CandidateItem::new("Advanced Python Tricks", 90.2, 800_000),
            CandidateItem::new("Cooking pasta", 50.0, 10_000),
        ]
    }

    const GOOD_REPLY: &str = r#"{"analysis": [
        {"index": 0, "score": 92, "rationale": "Beginner friendly."},
        {"index": 1, "score": 175, "rationale": "Advanced."},
        {"index": 2, "score": 3, "rationale": "Off topic."}
    ]}"#;

    fn assert_sorted(results: &[ScoredResult]) {
        assert!(
            results
                .windows(2)
                .all(|pair| pair[0].composite_score() >= pair[1].composite_score())
        );
    }

    // ── Empty input ────────────────────────────────────────────────────────

    #[test]
    fn empty_input_skips_configuration_and_remote_call() {
        let model = ScriptedModel::default();
        let (mut analyzer, connects) = analyzer_for(&model);
        assert!(analyzer.analyze(&[], "anything").unwrap().is_empty());
        assert_eq!(connects.get(), 0);
        assert_eq!(model.calls(), 0);
        assert!(!analyzer.is_configured());
    }

    // ── Success paths ──────────────────────────────────────────────────────

    #[test]
    fn well_formed_reply_scores_every_item() {
        let model = ScriptedModel::with_replies(vec![Ok(GOOD_REPLY.to_string())]);
        let (mut analyzer, _) = analyzer_for(&model);
        let results = analyzer.analyze(&items(), "learn python").unwrap();

        assert_eq!(results.len(), 3);
        assert_sorted(&results);
        let relevance = |title: &str| {
            results
                .iter()
                .find(|r| r.item.title == title)
                .unwrap()
                .scoring
                .relevance_score
        };
        assert_eq!(relevance("Python Tutorial for Beginners 2025"), 92.0);
        assert_eq!(relevance("Advanced Python Tricks"), 100.0);
        assert_eq!(relevance("Cooking pasta"), 3.0);
        assert_eq!(model.calls(), 1);
        assert!(model.prompts.borrow()[0].contains("\"learn python\""));
    }

    #[test]
    fn fenced_reply_matches_bare_reply() {
        let bare = ScriptedModel::with_replies(vec![Ok(GOOD_REPLY.to_string())]);
        let fenced = ScriptedModel::with_replies(vec![Ok(format!(
            "Sure, here you go:\n```json\n{GOOD_REPLY}\n```"
        ))]);
        let (mut bare_analyzer, _) = analyzer_for(&bare);
        let (mut fenced_analyzer, _) = analyzer_for(&fenced);

        assert_eq!(
            bare_analyzer.analyze(&items(), "q").unwrap(),
            fenced_analyzer.analyze(&items(), "q").unwrap()
        );
    }

    #[test]
    fn transient_failure_is_retried() {
        let model = ScriptedModel::with_replies(vec![
            Err(quota_error()),
            Ok(GOOD_REPLY.to_string()),
        ]);
        let (mut analyzer, _) = analyzer_for(&model);
        let results = analyzer.analyze(&items(), "q").unwrap();

        assert_eq!(model.calls(), 2);
        assert!(results.iter().all(|r| r.scoring.rationale != FALLBACK_RATIONALE));
    }

    // ── Fallback paths ─────────────────────────────────────────────────────

    #[test]
    fn exhausted_retries_return_exact_fallback() {
        let model = ScriptedModel::with_replies(vec![
            Err(quota_error()),
            Err(quota_error()),
            Err(quota_error()),
        ]);
        let (mut analyzer, _) = analyzer_for(&model);
        let results = analyzer.analyze(&items(), "q").unwrap();

        assert_eq!(model.calls(), 3);
        assert_eq!(results, fallback(&items()));
        assert!(results.iter().all(|r| r.scoring.relevance_score == 50.0));
    }

    #[test]
    fn unparseable_reply_falls_back_without_retrying() {
        let model = ScriptedModel::with_replies(vec![Ok("I'd rather not.".to_string())]);
        let (mut analyzer, _) = analyzer_for(&model);
        let results = analyzer.analyze(&items(), "q").unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(results, fallback(&items()));
    }

    #[test]
    fn sole_out_of_range_entry_falls_back() {
        let reply = r#"{"analysis": [{"index": 3, "score": 99, "rationale": "ghost"}]}"#;
        let model = ScriptedModel::with_replies(vec![Ok(reply.to_string())]);
        let (mut analyzer, _) = analyzer_for(&model);
        assert_eq!(analyzer.analyze(&items(), "q").unwrap(), fallback(&items()));
    }

    #[test]
    fn partial_reply_keeps_only_matched_items() {
        let reply = r#"{"analysis": [{"index": 2, "score": 99, "rationale": "best"}]}"#;
        let model = ScriptedModel::with_replies(vec![Ok(reply.to_string())]);
        let (mut analyzer, _) = analyzer_for(&model);
        let results = analyzer.analyze(&items(), "q").unwrap();

        assert_eq!(results.len(), 1);
        assert!(results.len() <= items().len());
        assert_eq!(results[0].item.title, "Cooking pasta");
    }

    // ── Configuration ──────────────────────────────────────────────────────

    #[test]
    fn configuration_failure_is_fatal_and_not_retried() {
        let connects = Rc::new(Cell::new(0));
        let counter = connects.clone();
        let mut analyzer = Analyzer::new(
            fast_settings(),
            RateLimiter::new(Duration::from_millis(1)),
            ResponseLog::disabled(),
            move || {
                counter.set(counter.get() + 1);
                Err(LlmError::MissingCredential("GEMINI_API_KEY"))
            },
        );

        let err = analyzer.analyze(&items(), "q").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Configuration(LlmError::MissingCredential(_))
        ));
        assert_eq!(connects.get(), 1);
        assert!(!analyzer.is_configured());

        // The next call tries to configure again.
        assert!(analyzer.analyze(&items(), "q").is_err());
        assert_eq!(connects.get(), 2);
    }

    #[test]
    fn model_is_configured_once_across_calls() {
        let model = ScriptedModel::with_replies(vec![
            Ok(GOOD_REPLY.to_string()),
            Ok(GOOD_REPLY.to_string()),
        ]);
        let (mut analyzer, connects) = analyzer_for(&model);
        analyzer.analyze(&items(), "q").unwrap();
        analyzer.analyze(&items(), "q").unwrap();

        assert_eq!(connects.get(), 1);
        assert_eq!(model.calls(), 2);
        assert!(analyzer.is_configured());
    }

    // ── Timing ─────────────────────────────────────────────────────────────

    #[test]
    fn backoff_grows_exponentially_between_attempts() {
        let model = ScriptedModel::default();
        let (mut analyzer, _) = analyzer_for(&model);
        analyzer.settings.backoff_base = Duration::from_millis(10);

        let started = Instant::now();
        analyzer.analyze(&items(), "q").unwrap();

        // 10ms after the first failure, 20ms after the second, none after the last.
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn separate_calls_share_the_rate_limit() {
        let model = ScriptedModel::with_replies(vec![
            Ok(GOOD_REPLY.to_string()),
            Ok(GOOD_REPLY.to_string()),
        ]);
        let (mut analyzer, _) = analyzer_for(&model);
        analyzer.limiter = RateLimiter::new(Duration::from_millis(50));

        analyzer.analyze(&items(), "q").unwrap();
        let between = Instant::now();
        analyzer.analyze(&items(), "q").unwrap();
        assert!(between.elapsed() >= Duration::from_millis(40));
    }

    // ── Outcome ────────────────────────────────────────────────────────────

    #[test]
    fn parsed_reply_is_reported_as_ranked() {
        let fenced = format!("```json\n{GOOD_REPLY}\n```");
        let model = ScriptedModel::with_replies(vec![Ok(fenced)]);
        let (mut analyzer, _) = analyzer_for(&model);
        let analysis = analyzer.evaluate(&items(), "q").unwrap();

        assert_eq!(analysis.outcome, Outcome::Ranked(Strategy::Fenced));
        assert!(analysis.is_ranked());
        assert_eq!(analysis.results.len(), 3);
    }

    #[test]
    fn every_fallback_path_is_reported_as_such() {
        let cases = [
            (
                vec![Err(quota_error()), Err(quota_error()), Err(quota_error())],
                FallbackReason::RetriesExhausted,
            ),
            (
                vec![Ok("no JSON at all".to_string())],
                FallbackReason::Unparseable,
            ),
            (
                vec![Ok(r#"{"analysis": [{"index": 9, "score": 90}]}"#.to_string())],
                FallbackReason::NoUsableEntries,
            ),
        ];

        for (replies, reason) in cases {
            let model = ScriptedModel::with_replies(replies);
            let (mut analyzer, _) = analyzer_for(&model);
            let analysis = analyzer.evaluate(&items(), "q").unwrap();

            assert_eq!(analysis.outcome, Outcome::Fallback(reason));
            assert!(!analysis.is_ranked());
            assert_eq!(analysis.results, fallback(&items()));
        }
    }

    #[test]
    fn reply_without_analysis_list_falls_back_without_salvage() {
        let reply = r#"{"results": [{"index": 0, "score": 90, "rationale": "x"}]}"#;
        let model = ScriptedModel::with_replies(vec![Ok(reply.to_string())]);
        let (mut analyzer, _) = analyzer_for(&model);
        let analysis = analyzer.evaluate(&items(), "q").unwrap();

        assert_eq!(analysis.outcome, Outcome::Fallback(FallbackReason::Unparseable));
        assert_eq!(analysis.results, fallback(&items()));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn empty_input_is_reported_as_no_candidates() {
        let model = ScriptedModel::default();
        let (mut analyzer, _) = analyzer_for(&model);
        let analysis = analyzer.evaluate(&[], "q").unwrap();
        assert_eq!(analysis.outcome, Outcome::NoCandidates);
        assert!(analysis.results.is_empty());
    }

    // ── Diagnostic log ─────────────────────────────────────────────────────

    #[test]
    fn responses_and_failures_reach_the_response_log() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("responses.log");
        let model = ScriptedModel::with_replies(vec![
            Err(quota_error()),
            Ok(format!("```json\n{GOOD_REPLY}\n```")),
        ]);
        let scripted = model.clone();
        let mut analyzer = Analyzer::new(
            fast_settings(),
            RateLimiter::new(Duration::from_millis(1)),
            ResponseLog::new(&log_path, 2000),
            move || Ok(Box::new(scripted.clone()) as Box<dyn TextGenerator>),
        );
        analyzer.analyze(&items(), "q").unwrap();

        let written = fs::read_to_string(&log_path).unwrap();
        assert!(written.contains("ERROR: Attempt 1/3: Gemini error (429): quota"));
        assert!(written.contains("] Response:\n```json"));
        assert!(written.contains("ERROR: direct parse failed: invalid JSON"));
        assert!(!written.contains("fenced parse failed"));
    }
}
