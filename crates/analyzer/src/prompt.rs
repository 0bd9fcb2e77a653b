//! Prompt sent to the scoring model.
//!
//! The layout asks for a bare `{"analysis": [...]}` document and shows a
//! worked example; [`crate::parser`] copes with replies that ignore this.

use crate::types::CandidateItem;

const OUTPUT_FORMAT: &str = r#"Output a valid JSON object:
{
  "analysis": [
    {
      "index": 0,
      "score": 85,
      "rationale": "Relevant title with high engagement."
    }
  ]
}"#;

const WORKED_EXAMPLE: &str = r#"Example for query "learn python":
{
  "analysis": [
    {
      "index": 0,
      "score": 92,
      "rationale": "Beginner-focused title, high like ratio, many views."
    },
    {
      "index": 1,
      "score": 75,
      "rationale": "Advanced topic, moderate engagement."
    }
  ]
}"#;

const INSTRUCTIONS: &str = "Instructions:\n\
- Output ONLY valid JSON (no markdown, no extra text).\n\
- Ensure one entry per video, using the video's number as \"index\".\n\
- Keep rationales concise (1-2 sentences).\n\
- Handle special characters in titles safely.";

pub fn build_prompt(items: &[CandidateItem], query: &str, title_char_cap: usize) -> String {
    format!(
        "Analyze these YouTube videos for the search query \"{query}\".\n\
         Evaluate each video based on:\n\
         1. Title relevance to the query.\n\
         2. Title clarity and appeal.\n\
         3. Like ratio (higher is better).\n\
         4. Views (higher is better).\n\
         Assign a score (0-100, integer) reflecting title quality and relevance, \
         adjusted by engagement (like ratio) and popularity (views).\n\n\
         {OUTPUT_FORMAT}\n\n\
         {WORKED_EXAMPLE}\n\n\
         {INSTRUCTIONS}\n\n\
         Videos:\n{videos}",
        videos = build_video_block(items, title_char_cap),
    )
}

fn build_video_block(items: &[CandidateItem], title_char_cap: usize) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let title = item.title.chars().take(title_char_cap).collect::<String>();
            format!(
                "{index}. {title} (Like Ratio: {}%, Views: {})",
                item.engagement_ratio,
                popularity_label(item)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn popularity_label(item: &CandidateItem) -> String {
    if item.popularity_formatted.is_empty() {
        item.popularity.to_string()
    } else {
        item.popularity_formatted.clone()
    }
}
