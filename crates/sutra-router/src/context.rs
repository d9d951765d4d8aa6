// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use sutra_config::RouterConfig;
use sutra_model::{tokens, Message, Role, ToolSchema};

/// Feature-vector dimension: seven context features plus a bias term.
pub const DIM: usize = 8;

/// Seven request features, each clamped to [0, 1].
///
/// Named after the state "beyond the three" in which the router sees the
/// request whole rather than through any single signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TuriyaContext {
    pub complexity: f64,
    pub urgency: f64,
    pub creativity: f64,
    pub precision: f64,
    pub code_ratio: f64,
    pub conversation_depth: f64,
    pub memory_load: f64,
}

impl TuriyaContext {
    /// Feature vector with the leading bias term fixed at 1.
    pub fn vectorize(&self) -> [f64; DIM] {
        [
            1.0,
            self.complexity,
            self.urgency,
            self.creativity,
            self.precision,
            self.code_ratio,
            self.conversation_depth,
            self.memory_load,
        ]
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

// ─── Signal patterns ──────────────────────────────────────────────────────────

fn code_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(function|class|struct|impl|async|await|compile|refactor|debug|trait|enum|closure|pointer|mutex)\b")
            .unwrap()
    })
}

fn multi_step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(first\b.*\bthen\b|step \d|after that|\bthen\b|followed by|\bfinally\b)")
            .unwrap()
    })
}

fn expert_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(distributed|consensus|cryptograph\w*|lock-free|formal proof|type theory|optimi[sz]er|scheduler|memory model|linear algebra)\b")
            .unwrap()
    })
}

fn urgency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(urgent|asap|immediately|right now|quickly|deadline|production is down)\b")
            .unwrap()
    })
}

fn creativity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(brainstorm|design|imagine|creative|propose|invent|sketch|alternatives?)\b")
            .unwrap()
    })
}

fn precision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(exact(ly)?|precise(ly)?|specific(ally)?|verify|prove|measure|byte-for-byte)\b")
            .unwrap()
    })
}

fn audit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(audit|review|type-?check|lint)\b").unwrap())
}

fn file_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\b[\w.-]+/[\w./-]*|\.[A-Za-z][A-Za-z0-9]{0,4}\b)").unwrap())
}

fn all_caps_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|w| w.len() >= 3 && w.chars().all(|c| c.is_ascii_uppercase()))
        .count()
}

fn number_count(text: &str) -> usize {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\b\d+(\.\d+)?\b").unwrap());
    re.find_iter(text).count()
}

/// Characters inside fenced code blocks vs. total characters.
fn code_block_ratio(text: &str) -> (f64, bool) {
    let mut inside = false;
    let mut code_chars = 0usize;
    for segment in text.split("```") {
        if inside {
            code_chars += segment.len();
        }
        inside = !inside;
    }
    let has_block = text.matches("```").count() >= 2;
    if text.is_empty() {
        (0.0, false)
    } else {
        (code_chars as f64 / text.len() as f64, has_block)
    }
}

// ─── Extraction ───────────────────────────────────────────────────────────────

/// Derive the 7-feature context for a request.
///
/// Reads the last user message as the primary signal; token totals come from
/// the full request via the character estimator.
pub fn extract_context(
    messages: &[Message],
    system_prompt: Option<&str>,
    tools: &[ToolSchema],
    memory_hits: usize,
    cfg: &RouterConfig,
) -> TuriyaContext {
    let text = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text_content())
        .unwrap_or_default();

    let total_tokens = tokens::estimate_total_tokens(messages, system_prompt, tools);
    let (block_ratio, has_code_block) = code_block_ratio(&text);

    // Complexity: token mass plus structural signals.
    let mut complexity = if total_tokens > 500 {
        0.3
    } else if total_tokens > 200 {
        0.2
    } else if total_tokens > 50 {
        0.1
    } else {
        0.0
    };
    if code_keyword_re().is_match(&text) {
        complexity += 0.15;
    }
    if has_code_block {
        complexity += 0.15;
    }
    if multi_step_re().is_match(&text) {
        complexity += 0.2;
    }
    if expert_domain_re().is_match(&text) {
        complexity += 0.3;
    }

    // Urgency: explicit phrasing, exclamation, shouting.
    let mut urgency = if urgency_re().is_match(&text) { 0.5 } else { 0.0 };
    urgency += (0.1 * text.matches('!').count() as f64).min(0.3);
    urgency += (0.05 * all_caps_words(&text) as f64).min(0.2);

    // Creativity: open-ended requests.
    let mut creativity = if creativity_re().is_match(&text) { 0.5 } else { 0.0 };
    if text.contains('?') {
        creativity += 0.1;
    }
    if text.to_lowercase().contains("how") || text.to_lowercase().contains("why") {
        creativity += 0.1;
    }

    // Precision: exactness demands.
    let mut precision = if precision_re().is_match(&text) { 0.5 } else { 0.0 };
    precision += (0.03 * number_count(&text) as f64).min(0.2);
    if audit_re().is_match(&text) {
        precision += 0.2;
    }

    // Code ratio: fenced content plus weaker keyword/file-ref signals.
    let mut code_ratio = block_ratio;
    if code_keyword_re().is_match(&text) {
        code_ratio += 0.2;
    }
    if file_ref_re().is_match(&text) {
        code_ratio += 0.1;
    }

    let depth_cap = (2 * cfg.max_conversation_depth).max(1);
    let memory_cap = cfg.max_memory_hits.max(1);

    TuriyaContext {
        complexity: clamp01(complexity),
        urgency: clamp01(urgency),
        creativity: clamp01(creativity),
        precision: clamp01(precision),
        code_ratio: clamp01(code_ratio),
        conversation_depth: clamp01(messages.len() as f64 / depth_cap as f64),
        memory_load: clamp01(memory_hits as f64 / memory_cap as f64),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_for(text: &str) -> TuriyaContext {
        let msgs = vec![Message::user(text)];
        extract_context(&msgs, None, &[], 0, &RouterConfig::default())
    }

    #[test]
    fn vector_has_bias_first() {
        let c = TuriyaContext { complexity: 0.5, ..Default::default() };
        let v = c.vectorize();
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], 0.5);
        assert_eq!(v.len(), DIM);
    }

    #[test]
    fn all_features_clamped_to_unit_interval() {
        let c = ctx_for(&format!(
            "URGENT URGENT URGENT!!!!!! fix the distributed consensus optimizer now {} ```{}```",
            "step 1 then step 2",
            "x".repeat(4000)
        ));
        for f in [
            c.complexity,
            c.urgency,
            c.creativity,
            c.precision,
            c.code_ratio,
            c.conversation_depth,
            c.memory_load,
        ] {
            assert!((0.0..=1.0).contains(&f), "feature out of range: {f}");
        }
    }

    #[test]
    fn urgency_zero_for_calm_text() {
        assert_eq!(ctx_for("please tidy the docs when convenient").urgency, 0.0);
    }

    #[test]
    fn urgency_pattern_scores_half() {
        let c = ctx_for("this is urgent");
        assert!((c.urgency - 0.5).abs() < 1e-9);
    }

    #[test]
    fn exclamations_add_tenth_each_capped() {
        let c = ctx_for("now!!!!!");
        assert!((c.urgency - 0.3).abs() < 1e-9, "5 bangs cap at 0.3, got {}", c.urgency);
    }

    #[test]
    fn code_block_raises_complexity_and_ratio() {
        let plain = ctx_for("describe the weather");
        let coded = ctx_for("```rust\nfn main() {}\n```");
        assert!(coded.complexity > plain.complexity);
        assert!(coded.code_ratio > plain.code_ratio);
    }

    #[test]
    fn expert_domain_bumps_complexity() {
        let c = ctx_for("implement a lock-free queue with formal proof");
        assert!(c.complexity >= 0.3);
    }

    #[test]
    fn conversation_depth_scales_with_history() {
        let cfg = RouterConfig::default();
        let short = extract_context(&[Message::user("hi")], None, &[], 0, &cfg);
        let msgs: Vec<Message> = (0..40).map(|i| Message::user(format!("m{i}"))).collect();
        let long = extract_context(&msgs, None, &[], 0, &cfg);
        assert!(long.conversation_depth > short.conversation_depth);
        assert!((long.conversation_depth - 40.0 / 100.0).abs() < 1e-9);
    }

    #[test]
    fn memory_load_saturates_at_cap() {
        let cfg = RouterConfig::default();
        let c = extract_context(&[Message::user("x")], None, &[], 999, &cfg);
        assert_eq!(c.memory_load, 1.0);
    }

    #[test]
    fn precision_counts_numbers() {
        let none = ctx_for("make it exact");
        let some = ctx_for("make it exact: 10 items of 32 bytes in 4 lanes");
        assert!(some.precision > none.precision);
    }

    #[test]
    fn empty_history_is_all_zero_except_nothing() {
        let cfg = RouterConfig::default();
        let c = extract_context(&[], None, &[], 0, &cfg);
        assert_eq!(c.urgency, 0.0);
        assert_eq!(c.code_ratio, 0.0);
    }
}
