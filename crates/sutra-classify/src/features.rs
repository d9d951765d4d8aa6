// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Surface features of a raw input, extracted without any model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub has_code: bool,
    pub has_file_paths: bool,
    pub has_error_stack: bool,
    pub question_count: usize,
    pub word_count: usize,
    pub sentence_count: usize,
    /// The text opens with a command verb ("fix the parser", "add a test").
    pub imperative: bool,
    /// The text sequences work ("first ... then", "step 2", "after that").
    pub multi_step: bool,
    pub technical: bool,
}

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(```|\bfn\s+\w+|\bdef\s+\w+|\bclass\s+\w+|=>|\{\s*$|;\s*$)")
            .unwrap()
    })
}

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // A slash-separated path segment ("src/", "a/b/c.rs") or a bare
        // extension reference (".ts files").
        Regex::new(r"(\b[\w.-]+/[\w./-]*|\.[A-Za-z][A-Za-z0-9]{0,4}\b)").unwrap()
    })
}

fn error_stack_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(at \S+:\d+|Traceback \(most recent call last\)|panicked at|Exception in |stack trace|\bE\d{4}\b|Error:)",
        )
        .unwrap()
    })
}

fn multi_step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\bthen\b|after that|\bnext,|step \d|first\b.*\bthen\b|followed by|\bfinally\b|and also\b)")
            .unwrap()
    })
}

fn technical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(api|database|function|class|server|endpoint|compil\w*|deploy\w*|query|thread|async|memory|cache|token|schema|regex|module|struct|trait|test\w*|build)\b")
            .unwrap()
    })
}

const IMPERATIVE_VERBS: &[&str] = &[
    "add", "build", "change", "check", "create", "debug", "delete", "document", "explain", "find",
    "fix", "generate", "implement", "install", "list", "make", "move", "refactor", "remove",
    "rename", "review", "run", "search", "show", "test", "update", "write",
];

/// Extract cheap surface features from raw input text.
///
/// Fully synchronous, no I/O.  Bounded by a single regex pass per feature.
pub fn extract_features(text: &str) -> Features {
    let trimmed = text.trim();
    let word_count = trimmed.split_whitespace().count();
    let sentence_count = trimmed
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(usize::from(!trimmed.is_empty()));

    let first_word = trimmed
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .unwrap_or_default();

    let has_code = code_re().is_match(text);
    let has_error_stack = error_stack_re().is_match(text);

    Features {
        has_code,
        has_file_paths: file_path_re().is_match(text),
        has_error_stack,
        question_count: text.matches('?').count(),
        word_count,
        sentence_count,
        imperative: IMPERATIVE_VERBS.contains(&first_word.as_str()),
        multi_step: multi_step_re().is_match(text),
        technical: has_code || has_error_stack || technical_re().is_match(text),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
