//! Ranking core: turn an unreliable free-form model reply into a scored,
//! sorted candidate list.
//!
//! [`Analyzer::analyze`] builds the prompt, calls the model through a
//! [`RateLimiter`] with retries, recovers entries with the [`parser`] cascade
//! and blends them with engagement and popularity in [`score`].  Whenever the
//! model cannot be used the [`fallback`] set is returned instead.

pub mod diagnostics;
pub mod fallback;
pub mod normalize;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod rate_limit;
pub mod scorer;
pub mod types;

pub use diagnostics::ResponseLog;
pub use fallback::{FALLBACK_RATIONALE, fallback};
pub use normalize::{NEUTRAL_SCORE, normalize_score};
pub use orchestrator::{
    Analysis, AnalysisError, AnalysisSettings, Analyzer, Connector, FallbackReason, Outcome,
};
pub use parser::{EntryError, ParseError, ParsedResponse, Strategy, StrategyError, parse};
pub use prompt::build_prompt;
pub use rate_limit::RateLimiter;
pub use scorer::{Weights, score, score_entries};
pub use types::{AnalysisEntry, CandidateItem, ScoredResult, Scoring};
