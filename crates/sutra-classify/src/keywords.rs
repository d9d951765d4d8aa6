// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Words excluded from keyword extraction.  Kept sorted for readability, not
/// for lookup — the list is short enough that a linear scan wins.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "again", "all", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "else", "for", "from", "further", "he",
    "her", "here", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "may",
    "me", "might", "must", "my", "no", "not", "of", "on", "once", "or", "our", "over", "please",
    "shall", "she", "should", "so", "some", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "to", "too", "under", "us", "very", "was", "we",
    "were", "what", "when", "where", "which", "who", "whom", "why", "will", "with", "would",
    "you", "your",
];

/// Maximum number of keywords returned.
const MAX_KEYWORDS: usize = 15;

/// Extract content keywords from raw input.
///
/// Lowercase tokenization on non-word separators, preserving dots so that
/// file extensions (`.ts`) and dotted names (`tokio.rs`) survive.  Tokens
/// shorter than two characters, stop words, and duplicates are dropped;
/// first-occurrence order is preserved; at most [`MAX_KEYWORDS`] returned.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for raw in text
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_'))
    {
        let token = raw.trim_matches(|c: char| !(c.is_alphanumeric() || c == '.'));
        if token.len() < 2 {
            continue;
        }
        if STOP_WORDS.contains(&token) {
            continue;
        }
        if seen.iter().any(|k| k == token) {
            continue;
        }
        seen.push(token.to_string());
        if seen.len() == MAX_KEYWORDS {
            break;
        }
    }
    seen
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
