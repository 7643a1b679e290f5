// SPDX-License-Identifier: MIT OR Apache-2.0

//! Grounding context assembly for an answer generator.

use crate::retriever::Match;

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 3600;

const SEPARATOR: &str = "\n\n";

/// Formats matches as numbered passages: `"[1] text\n\n[2] text"`.
///
/// Passages are added in rank order until the next one would push the packed
/// length past `max_chars`. The first passage is always kept so a non-empty
/// result never yields an empty context.
pub fn pack_context(matches: &[Match], max_chars: usize) -> String {
    let separator_len = SEPARATOR.chars().count();
    let mut parts: Vec<String> = Vec::with_capacity(matches.len());
    let mut running = 0usize;

    for (idx, m) in matches.iter().enumerate() {
        let part = format!("[{}] {}", idx + 1, m.text);
        let next = running + part.chars().count() + separator_len;
        if !parts.is_empty() && next > max_chars {
            break;
        }
        parts.push(part);
        running = next;
    }

    parts.join(SEPARATOR)
}
