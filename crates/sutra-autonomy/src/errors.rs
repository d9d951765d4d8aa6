// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! String-driven error classification.
//!
//! Matching on message text instead of error types is deliberate: errors
//! cross the tool and provider boundaries as opaque strings, and keeping
//! the taxonomy data-driven means one table to extend instead of a growing
//! set of downcasts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// Retrying cannot help; surface immediately.
    Fatal,
    /// Unclassified; repeated occurrences escalate to fatal.
    Unknown,
}

/// Substrings that mark an error as fatal.  Checked before the transient
/// table: an error that matches both must not be retried.
const FATAL_PATTERNS: &[&str] = &[
    "invalid input",
    "permission denied",
    "unauthorized",
    "401",
    "403",
    "invalid api key",
    "context length exceeded",
];

const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econn",
    "429",
    "rate limit",
    "network error",
    "connection reset",
    "500",
    "502",
    "503",
    "504",
    "overloaded",
];

/// Classify an error by its message, walking the cause chain so a wrapped
/// transport error is still recognised.
pub fn classify_error(err: &anyhow::Error) -> ErrorClass {
    let mut haystack = String::new();
    for cause in err.chain() {
        haystack.push_str(&cause.to_string().to_lowercase());
        haystack.push('\n');
    }
    if FATAL_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return ErrorClass::Fatal;
    }
    if TRANSIENT_PATTERNS.iter().any(|p| haystack.contains(p)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Unknown
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
