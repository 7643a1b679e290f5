// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable.

use colored::Colorize;
use serde::Serialize;

use crate::retriever::Match;

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var_os("NO_COLOR").is_none()
}

/// Colorize source id (cyan)
pub fn colorize_source(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize similarity score (yellow)
pub fn colorize_score(score: f32, use_color: bool) -> String {
    let text = format!("{:.3}", score);
    if use_color {
        text.yellow().to_string()
    } else {
        text
    }
}

/// Colorize secondary text (dimmed)
pub fn colorize_dim(text: &str, use_color: bool) -> String {
    if use_color {
        text.dimmed().to_string()
    } else {
        text.to_string()
    }
}

/// Success marker (green check)
pub fn success_mark(use_color: bool) -> String {
    if use_color {
        "✓".green().to_string()
    } else {
        "✓".to_string()
    }
}

/// Failure marker (red cross)
pub fn failure_mark(use_color: bool) -> String {
    if use_color {
        "✗".red().to_string()
    } else {
        "✗".to_string()
    }
}

/// Serializes `value` as pretty or compact JSON.
pub fn to_json<T: Serialize>(value: &T, compact: bool) -> serde_json::Result<String> {
    if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
}

/// Single-line preview of a chunk, at most `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// Renders one match as a two-line text block.
pub fn format_match(rank: usize, m: &Match, use_color: bool) -> String {
    format!(
        "[{}] {}  {} #{}  {}\n    {}",
        rank,
        colorize_score(m.score, use_color),
        colorize_source(&m.source_id, use_color),
        m.sequence_index,
        colorize_dim(&m.chunk_id, use_color),
        preview(&m.text, 160)
    )
}
