//! Plain-text rendering of ranked results for the terminal.

use chrono::NaiveDateTime;
use serde_json::Value;
use vidrank_analyzer::ScoredResult;

pub const NO_RESULTS: &str = "No videos found matching your criteria.";
const FALLBACK_WIDTH: usize = 100;

pub fn terminal_width() -> usize {
    crossterm::terminal::size()
        .map(|(columns, _)| columns as usize)
        .unwrap_or(FALLBACK_WIDTH)
}

/// Cut `text` to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut = text.chars().take(max).collect::<String>();
    cut.push_str("...");
    cut
}

/// `H:MM:SS` for an hour or longer, `M:SS` otherwise.
pub fn format_duration(total_seconds: u64) -> String {
    let (minutes, seconds) = (total_seconds / 60, total_seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// `2025-01-15T10:00:00Z` → `Jan 15, 2025`; anything else is returned as-is.
pub fn format_published(iso: &str) -> String {
    NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%SZ")
        .map(|date| date.format("%b %d, %Y").to_string())
        .unwrap_or_else(|_| iso.to_string())
}

fn text_field(result: &ScoredResult, key: &str) -> String {
    match result.item.extra.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn duration_label(result: &ScoredResult) -> String {
    if let Some(label) = result.item.extra_str("duration_formatted") {
        return label.to_string();
    }
    // `duration` is minutes on the search side.
    match result.item.extra.get("duration").and_then(Value::as_f64) {
        Some(minutes) if minutes >= 0.0 => format_duration((minutes * 60.0).round() as u64),
        _ => "N/A".to_string(),
    }
}

fn published_label(result: &ScoredResult) -> String {
    if let Some(label) = result.item.extra_str("published_formatted") {
        return label.to_string();
    }
    result
        .item
        .extra_str("publishedAt")
        .map(format_published)
        .unwrap_or_default()
}

fn views_label(result: &ScoredResult) -> String {
    if result.item.popularity_formatted.is_empty() {
        result.item.popularity.to_string()
    } else {
        result.item.popularity_formatted.clone()
    }
}

fn ratio_label(result: &ScoredResult) -> String {
    if result.item.engagement_ratio > 0.0 {
        format!("{}%", result.item.engagement_ratio)
    } else {
        "N/A".to_string()
    }
}

/// Ranked table, columns sized for a terminal `width` columns wide.
pub fn render_table(results: &[ScoredResult], show_description: bool, width: usize) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_string();
    }
    let title_cap = (width / 4).clamp(20, 50);
    let channel_cap = (width / 10).clamp(10, 20);

    let mut headers = vec![
        "#", "Title", "Duration", "Views", "Like Ratio", "Published", "Channel", "Score", "Link",
    ];
    if show_description {
        headers.push("Description");
    }

    let rows = results
        .iter()
        .enumerate()
        .map(|(position, result)| {
            let mut row = vec![
                (position + 1).to_string(),
                truncate(&result.item.title, title_cap),
                duration_label(result),
                views_label(result),
                ratio_label(result),
                published_label(result),
                truncate(&text_field(result, "channel"), channel_cap),
                result.composite_score().to_string(),
                text_field(result, "url"),
            ];
            if show_description {
                row.push(text_field(result, "description"));
            }
            row
        })
        .collect::<Vec<_>>();

    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in &rows {
        for (column, cell) in row.iter().enumerate() {
            widths[column] = widths[column].max(cell.chars().count());
        }
    }

    let border = widths
        .iter()
        .map(|w| "-".repeat(w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let border = format!("+{border}+");

    let mut lines = vec![border.clone(), render_row(&headers, &widths), border.clone()];
    for row in &rows {
        lines.push(render_row(row, &widths));
    }
    lines.push(border);
    lines.join("\n")
}

fn render_row<S: AsRef<str>>(cells: &[S], widths: &[usize]) -> String {
    let cells = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| {
            let cell = cell.as_ref();
            let pad = width.saturating_sub(cell.chars().count());
            format!(" {cell}{} ", " ".repeat(pad))
        })
        .collect::<Vec<_>>()
        .join("|");
    format!("|{cells}|")
}

/// Summary block for the top-ranked result.
pub fn render_best_pick(result: &ScoredResult) -> String {
    let scoring = &result.scoring;
    let mut lines = vec![
        "Best Video (Based on Composite Score):".to_string(),
        format!("Title: {}", result.item.title),
    ];
    if let Some(url) = result.item.extra_str("url") {
        lines.push(format!("URL: {url}"));
    }
    lines.push(format!("Composite Score: {}/100", scoring.composite_score));
    lines.push(format!(" - Title Score: {}/100", scoring.relevance_score));
    lines.push(format!(
        " - Like Ratio Contribution: {}/20",
        scoring.engagement_contribution
    ));
    lines.push(format!(
        " - Views Contribution: {}/20",
        scoring.popularity_contribution
    ));
    lines.push(format!("Explanation: {}", scoring.rationale));
    if let Some(channel) = result.item.extra_str("channel") {
        lines.push(format!("Channel: {channel}"));
    }
    let duration = duration_label(result);
    if duration != "N/A" {
        lines.push(format!("Duration: {duration}"));
    }
    let published = published_label(result);
    if !published.is_empty() {
        lines.push(format!("Published: {published}"));
    }
    lines.push(format!("Views: {}", views_label(result)));
    lines.push(format!("Like Ratio: {}%", result.item.engagement_ratio));
    lines.join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────
