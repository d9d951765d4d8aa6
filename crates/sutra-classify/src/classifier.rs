// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::features::{extract_features, Features};
use crate::keywords::extract_keywords;

// ─── Result types ─────────────────────────────────────────────────────────────

/// What the user is asking for, drawn from a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FileOperation,
    CodeGeneration,
    CodeReview,
    Debugging,
    Refactoring,
    Search,
    Explanation,
    Documentation,
    System,
    Conversation,
}

/// Tie-break order: when two intents score equally, the more specific wins.
/// This is also the iteration order for scoring, so ties resolve for free.
const SPECIFICITY: &[Intent] = &[
    Intent::FileOperation,
    Intent::CodeGeneration,
    Intent::CodeReview,
    Intent::Debugging,
    Intent::Refactoring,
    Intent::Search,
    Intent::Documentation,
    Intent::System,
    Intent::Explanation,
    Intent::Conversation,
];

/// Coarse execution route chosen without consulting the bandit router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Route {
    /// Serve directly from tools, no model call.
    ToolOnly,
    Haiku,
    Sonnet,
    Opus,
}

/// Full classification of one raw input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub keywords: Vec<String>,
    /// 0.0 (one clear winner) .. 1.0 (nothing matched), rounded to 2 decimals.
    pub ambiguity: f64,
    pub route: Route,
    /// Raw score of the winning intent, clamped to [0, 1].
    pub confidence: f64,
    pub features: Features,
    pub duration_ms: f64,
}

// ─── Pattern table ────────────────────────────────────────────────────────────

struct IntentPattern {
    regex: Regex,
    base_confidence: f64,
}

fn patterns_for(intent: Intent) -> &'static [IntentPattern] {
    static TABLE: OnceLock<Vec<(Intent, Vec<IntentPattern>)>> = OnceLock::new();
    let table = TABLE.get_or_init(build_pattern_table);
    table
        .iter()
        .find(|(i, _)| *i == intent)
        .map(|(_, ps)| ps.as_slice())
        .unwrap_or(&[])
}

fn build_pattern_table() -> Vec<(Intent, Vec<IntentPattern>)> {
    fn p(re: &str, base_confidence: f64) -> IntentPattern {
        IntentPattern {
            // Table entries are fixed strings; a failure here is a programmer
            // error caught by the table test below.
            regex: Regex::new(re).unwrap(),
            base_confidence,
        }
    }
    vec![
        (
            Intent::FileOperation,
            vec![
                p(r"(?i)\b(create|open|read|write|delete|move|rename|copy)\b.*\b(files?|folders?|director(y|ies))\b", 0.9),
                p(r"(?i)\b(mkdir|touch|chmod)\b|\brm -|\bmv\b|\bcp\b", 0.85),
                p(r"(?i)\bfiles?\b", 0.5),
            ],
        ),
        (
            Intent::CodeGeneration,
            vec![
                p(r"(?i)\b(write|implement|generate|create|add)\b.*\b(function|method|class|module|struct|endpoint|test|script|code)\b", 0.9),
                p(r"(?i)\b(scaffold|boilerplate|stub out)\b", 0.8),
                p(r"(?i)\bnew feature\b", 0.7),
            ],
        ),
        (
            Intent::CodeReview,
            vec![
                p(r"(?i)\breview\b.*\b(code|change|diff|patch|pr|pull request)\b", 0.9),
                p(r"(?i)\b(code review|look over|critique)\b", 0.8),
                p(r"(?i)\bany (bugs|issues|problems) (in|with)\b", 0.7),
            ],
        ),
        (
            Intent::Debugging,
            vec![
                p(r"(?i)\bfix\b.*\b(bug|error|failure|crash|panic|test)\b", 0.9),
                p(r"(?i)\b(debug|stack ?trace|exception|segfault|panick?(ed|s)?)\b", 0.85),
                p(r"(?i)\bwhy (is|does|did)\b.*\b(fail|break|crash|error)\w*\b", 0.8),
                p(r"(?i)\b(error|broken|failing)\b", 0.55),
            ],
        ),
        (
            Intent::Refactoring,
            vec![
                p(r"(?i)\brefactor\b", 0.95),
                p(r"(?i)\b(clean ?up|restructure|extract (a )?(method|function)|inline|decouple)\b", 0.8),
                p(r"(?i)\b(simplify|deduplicate|tidy)\b", 0.7),
            ],
        ),
        (
            Intent::Search,
            vec![
                p(r"(?i)\b(find|search|grep|locate|look for|where is|where are)\b", 0.85),
                p(r"(?i)\blist (all|every)\b", 0.8),
                p(r"(?i)\b(usages?|occurrences?|references?) of\b", 0.8),
            ],
        ),
        (
            Intent::Explanation,
            vec![
                p(r"(?i)\b(explain|describe|walk me through)\b", 0.85),
                p(r"(?i)\b(what (is|does|are)|how (does|do|is)|why (is|does|do))\b", 0.75),
                p(r"(?i)\bhelp me understand\b", 0.8),
            ],
        ),
        (
            Intent::Documentation,
            vec![
                p(r"(?i)\b(document|write docs|docstrings?|readme|changelog)\b", 0.85),
                p(r"(?i)\badd (doc )?comments\b", 0.8),
                p(r"(?i)\bapi documentation\b", 0.85),
            ],
        ),
        (
            Intent::System,
            vec![
                p(r"(?i)\b(install|upgrade|configure|setup|set up)\b.*\b(dependency|package|tool|environment|toolchain)\b", 0.8),
                p(r"(?i)\b(restart|shutdown|daemon|service|env(ironment)? variables?)\b", 0.7),
                p(r"(?i)\b(version|config(uration)?)\b", 0.55),
            ],
        ),
        (
            Intent::Conversation,
            vec![
                p(r"(?i)^(hi|hello|hey|yo|thanks|thank you|good (morning|afternoon|evening))\b", 0.9),
                p(r"(?i)\bhow are you\b", 0.9),
                p(r"(?i)^(ok|okay|sure|got it|sounds good)\b", 0.7),
            ],
        ),
    ]
}

// ─── Scoring ──────────────────────────────────────────────────────────────────

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Raw per-intent scores: max base-confidence over matched patterns, plus
/// fixed feature boosts, clamped to [0, 1].  Returned in specificity order.
fn score_intents(text: &str, features: &Features) -> Vec<(Intent, f64)> {
    SPECIFICITY
        .iter()
        .map(|&intent| {
            let mut score = patterns_for(intent)
                .iter()
                .filter(|p| p.regex.is_match(text))
                .map(|p| p.base_confidence)
                .fold(0.0_f64, f64::max);

            // Feature boosts are additive and intent-specific.
            if features.has_error_stack && intent == Intent::Debugging {
                score += 0.15;
            }
            if features.has_file_paths {
                match intent {
                    Intent::FileOperation => score += 0.10,
                    Intent::Search => score += 0.05,
                    _ => {}
                }
            }
            if features.has_code
                && matches!(intent, Intent::CodeGeneration | Intent::Debugging)
            {
                score += 0.05;
            }
            if features.question_count > 0 && intent == Intent::Explanation {
                score += 0.10;
            }
            (intent, clamp01(score))
        })
        .collect()
}

/// Ambiguity blends "how many intents are competitive" with "how weak the
/// winner is": `0.7·clamp((competitors−1)/3) + 0.3·(1−max)`, 2-decimal
/// rounded.  1.0 when nothing matched at all.
fn ambiguity_score(scores: &[(Intent, f64)], max: f64) -> f64 {
    if max == 0.0 {
        return 1.0;
    }
    let competitors = scores.iter().filter(|(_, s)| *s >= 0.6 * max).count();
    let crowding = clamp01((competitors as f64 - 1.0) / 3.0);
    let raw = 0.7 * crowding + 0.3 * (1.0 - max);
    (raw * 100.0).round() / 100.0
}

/// Route decision ladder.  The first matching rule wins.
fn decide_route(intent: Intent, confidence: f64, ambiguity: f64, features: &Features) -> Route {
    if ambiguity > 0.7 {
        return Route::Opus;
    }
    if features.multi_step && features.technical && features.word_count > 100 {
        return Route::Opus;
    }
    if intent == Intent::Search && confidence >= 0.8 {
        return Route::ToolOnly;
    }
    if intent == Intent::FileOperation && features.has_file_paths && confidence >= 0.8 {
        return Route::ToolOnly;
    }
    if intent == Intent::Conversation {
        return Route::Haiku;
    }
    if intent == Intent::Explanation && features.word_count <= 10 && !features.multi_step {
        return Route::Haiku;
    }
    if matches!(intent, Intent::FileOperation | Intent::Search) && !features.multi_step {
        return Route::Haiku;
    }
    if matches!(
        intent,
        Intent::CodeGeneration
            | Intent::CodeReview
            | Intent::Refactoring
            | Intent::Documentation
            | Intent::Debugging
            | Intent::System
    ) {
        return Route::Sonnet;
    }
    if intent == Intent::Explanation && features.word_count > 20 {
        return Route::Sonnet;
    }
    Route::Sonnet
}

/// Classify a raw input.
///
/// Total: every input gets an intent, a route, and a confidence — there is
/// no failure path.  Synchronous and model-free; wall clock stays well under
/// 5 ms for inputs up to ~8 KiB.
pub fn classify(text: &str) -> Classification {
    let started = Instant::now();
    let features = extract_features(text);
    let scores = score_intents(text, &features);

    // SPECIFICITY order + strict greater-than = specificity tie-break.
    let (mut intent, mut max) = (Intent::Conversation, 0.0_f64);
    for &(i, s) in &scores {
        if s > max {
            intent = i;
            max = s;
        }
    }

    let ambiguity = ambiguity_score(&scores, max);
    let route = decide_route(intent, max, ambiguity, &features);
    let keywords = extract_keywords(text);

    debug!(?intent, confidence = max, ambiguity, ?route, "classified input");

    Classification {
        intent,
        keywords,
        ambiguity,
        route,
        confidence: max,
        features,
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_table_compiles() {
        for intent in SPECIFICITY {
            let _ = patterns_for(*intent);
        }
    }

    // ── Intent selection ──────────────────────────────────────────────────────

    #[test]
    fn search_query_classified_as_search() {
        let c = classify("find all .ts files in src/");
        assert_eq!(c.intent, Intent::Search);
        assert!(c.features.has_file_paths);
        assert!(c.confidence >= 0.8, "confidence {}", c.confidence);
        assert_eq!(c.route, Route::ToolOnly);
        assert!(c.ambiguity <= 0.3, "ambiguity {}", c.ambiguity);
    }

    #[test]
    fn greeting_is_conversation_routed_to_haiku() {
        let c = classify("hey, how are you?");
        assert_eq!(c.intent, Intent::Conversation);
        assert_eq!(c.route, Route::Haiku);
    }

    #[test]
    fn refactor_request_routed_to_sonnet() {
        let c = classify("refactor the session module to use builder pattern");
        assert_eq!(c.intent, Intent::Refactoring);
        assert_eq!(c.route, Route::Sonnet);
    }

    #[test]
    fn debugging_gets_error_stack_boost() {
        let base = classify("fix the error");
        let boosted = classify("fix the error\nthread 'main' panicked at src/lib.rs:3:1");
        assert_eq!(boosted.intent, Intent::Debugging);
        assert!(boosted.confidence >= base.confidence);
    }

    #[test]
    fn code_generation_detected() {
        let c = classify("implement a parser function for the config format");
        assert_eq!(c.intent, Intent::CodeGeneration);
        assert_eq!(c.route, Route::Sonnet);
    }

    #[test]
    fn documentation_detected() {
        let c = classify("write docs for the public API surface");
        assert_eq!(c.intent, Intent::Documentation);
    }

    #[test]
    fn nothing_matched_yields_full_ambiguity() {
        let c = classify("zzz qqq vvv");
        assert_eq!(c.ambiguity, 1.0);
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.route, Route::Opus, "ambiguity > 0.7 escalates");
    }

    #[test]
    fn empty_input_is_total() {
        let c = classify("");
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.ambiguity, 1.0);
    }

    // ── Route ladder ──────────────────────────────────────────────────────────

    #[test]
    fn long_multi_step_technical_goes_to_opus() {
        let filler = "the api server database schema ".repeat(20);
        let text = format!("first migrate the schema, then update the endpoints. {filler}");
        let c = classify(&text);
        assert!(c.features.multi_step && c.features.technical);
        assert!(c.features.word_count > 100);
        assert_eq!(c.route, Route::Opus);
    }

    #[test]
    fn short_explanation_goes_to_haiku() {
        let c = classify("explain this regex");
        assert_eq!(c.intent, Intent::Explanation);
        assert_eq!(c.route, Route::Haiku);
    }

    #[test]
    fn file_operation_with_paths_is_tool_only() {
        let c = classify("delete the file build/cache.json");
        assert_eq!(c.intent, Intent::FileOperation);
        assert_eq!(c.route, Route::ToolOnly);
    }

    // ── Ambiguity formula ─────────────────────────────────────────────────────

    #[test]
    fn single_clear_winner_has_low_ambiguity() {
        let scores = vec![(Intent::Search, 0.9), (Intent::Explanation, 0.1)];
        let a = ambiguity_score(&scores, 0.9);
        // crowding = 0, weakness = 0.3 * 0.1 = 0.03
        assert_eq!(a, 0.03);
    }

    #[test]
    fn four_competitors_saturate_crowding() {
        let scores = vec![
            (Intent::Search, 0.8),
            (Intent::Explanation, 0.8),
            (Intent::Debugging, 0.8),
            (Intent::System, 0.8),
        ];
        let a = ambiguity_score(&scores, 0.8);
        // crowding = clamp(3/3) = 1 → 0.7 + 0.3*0.2 = 0.76
        assert_eq!(a, 0.76);
    }

    // ── Latency contract ──────────────────────────────────────────────────────

    #[test]
    fn classify_8kib_stays_within_latency_budget() {
        // Warm-up compiles the pattern tables outside the measured call.
        let _ = classify("warm up the regex tables");
        let text = "find the parser error in src/main.rs and fix it. ".repeat(170);
        assert!(text.len() >= 8000);
        let c = classify(&text);
        // 5 ms is the contract for optimized builds; debug builds get slack.
        let budget_ms = if cfg!(debug_assertions) { 50.0 } else { 5.0 };
        assert!(c.duration_ms < budget_ms, "took {} ms", c.duration_ms);
    }

    #[test]
    fn duration_is_reported() {
        let c = classify("hello");
        assert!(c.duration_ms >= 0.0);
    }
}
