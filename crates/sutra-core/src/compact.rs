// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sutra_config::CompactionConfig;
use sutra_model::{ContentPart, Message, Role};

use crate::state::AgentState;
use crate::summarize::LocalSummariser;

// ─── Tiers ────────────────────────────────────────────────────────────────────

/// How aggressively the message log is rewritten.  Unrelated to the
/// router's model-tier vocabulary — the two never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionTier {
    None,
    Soft,
    Medium,
    Hard,
}

/// True once utilization reaches 80% of the context limit.
pub fn should_compact(state: &AgentState, context_limit: usize) -> bool {
    state.utilization(context_limit) >= 0.8
}

/// Band the current utilization into a compaction tier.
pub fn tier(state: &AgentState, context_limit: usize) -> CompactionTier {
    let u = state.utilization(context_limit);
    if u < 0.60 {
        CompactionTier::None
    } else if u < 0.75 {
        CompactionTier::Soft
    } else if u < 0.90 {
        CompactionTier::Medium
    } else {
        CompactionTier::Hard
    }
}

// ─── Limits ───────────────────────────────────────────────────────────────────

/// Tool-result text beyond this many characters is truncated at soft tier.
const SOFT_RESULT_CAP: usize = 100;

/// Character budget for the deterministic summary.
const SUMMARY_CHAR_BUDGET: usize = 1500;

/// Individual code blocks quoted in the summary are cut at this length.
const CODE_BLOCK_CAP: usize = 240;

/// Commands quoted in the tool-usage summary are cut at this length.
const COMMAND_CAP: usize = 120;

// ─── Public API ───────────────────────────────────────────────────────────────

/// Rewrite the message log according to the tier the current utilization
/// falls in.  At [`CompactionTier::None`] the state is returned unchanged.
///
/// Deterministic: the hard tier uses the deterministic summary here; use
/// [`compact_tiered_with`] to attempt an LLM-assisted summary first.
pub fn compact_tiered(state: &AgentState, cfg: &CompactionConfig) -> AgentState {
    let t = tier(state, cfg.context_limit);
    compact_to_tier(state, cfg, t, None)
}

/// Like [`compact_tiered`], but at hard tier asks the configured local
/// summariser for the summary text first, falling back to the deterministic
/// summary on any failure.  The deterministic path never waits on the
/// network.
pub async fn compact_tiered_with(
    state: &AgentState,
    cfg: &CompactionConfig,
    summariser: Option<&LocalSummariser>,
) -> AgentState {
    let t = tier(state, cfg.context_limit);
    if t == CompactionTier::Hard {
        if let Some(s) = summariser {
            let window = cfg.hard_recent_window.max(cfg.protected_tail);
            if state.messages.len() > window {
                let cut = state.messages.len() - window;
                let compacted = &state.messages[..cut];
                let conversation = serialize_history(compacted);
                let tool_summary = tool_pattern_summary(compacted);
                match s.summarise(&conversation, &tool_summary).await {
                    Ok(text) if !text.trim().is_empty() => {
                        return compact_to_tier(state, cfg, t, Some(text));
                    }
                    Ok(_) => debug!("summariser returned empty text, using deterministic summary"),
                    Err(e) => debug!(error = %e, "summariser unavailable, using deterministic summary"),
                }
            }
        }
    }
    compact_to_tier(state, cfg, t, None)
}

/// Emergency fallback used when even hard-tier compaction cannot bring the
/// estimate under the limit.  Drops everything but the protected tail and
/// prepends a canned notice.  Purely deterministic; always succeeds.
pub fn emergency_compact(state: &AgentState, cfg: &CompactionConfig) -> AgentState {
    let mut out = state.clone();
    let keep = cfg.protected_tail.min(out.messages.len());
    let preserved: Vec<Message> = out.messages[out.messages.len() - keep..].to_vec();
    let notice = Message::assistant(
        "[Context emergency-compacted: earlier history was dropped to prevent a \
         context-window overflow. Earlier decisions may be missing; re-ask the \
         user for anything load-bearing.]",
    );
    out.messages = std::iter::once(notice).chain(preserved).collect();
    out
}

// ─── Tier application ─────────────────────────────────────────────────────────

fn compact_to_tier(
    state: &AgentState,
    cfg: &CompactionConfig,
    t: CompactionTier,
    llm_summary: Option<String>,
) -> AgentState {
    match t {
        CompactionTier::None => state.clone(),
        CompactionTier::Soft => {
            let mut out = state.clone();
            soft_pass(&mut out.messages, cfg.protected_tail);
            out
        }
        CompactionTier::Medium => {
            windowed_compact(state, cfg, cfg.recent_window, llm_summary)
        }
        CompactionTier::Hard => {
            windowed_compact(state, cfg, cfg.hard_recent_window, llm_summary)
        }
    }
}

/// Collapse tool-call arguments and truncate tool results in place, leaving
/// the last `protected_tail` messages untouched.
fn soft_pass(messages: &mut [Message], protected_tail: usize) {
    let protect_from = messages.len().saturating_sub(protected_tail);
    for msg in &mut messages[..protect_from] {
        for part in &mut msg.parts {
            match part {
                ContentPart::ToolCall { arguments, .. } => {
                    *arguments = "{}".to_string();
                }
                ContentPart::ToolResult { text, .. } => {
                    if text.chars().count() > SOFT_RESULT_CAP {
                        let truncated: String = text.chars().take(SOFT_RESULT_CAP).collect();
                        *text = format!("{truncated}...");
                    }
                }
                _ => {}
            }
        }
    }
}

/// Medium/hard body: summarize everything before the recent window, keep the
/// window (soft-passed), and prefix a single system-role summary message.
fn windowed_compact(
    state: &AgentState,
    cfg: &CompactionConfig,
    window: usize,
    llm_summary: Option<String>,
) -> AgentState {
    let window = window.max(cfg.protected_tail).max(1);
    let mut out = state.clone();
    if out.messages.len() <= window {
        soft_pass(&mut out.messages, cfg.protected_tail);
        return out;
    }

    let cut = out.messages.len() - window;
    let compacted: Vec<Message> = out.messages[..cut].to_vec();
    let mut kept: Vec<Message> = out.messages[cut..].to_vec();

    drop_orphan_tool_results(&mut kept);
    soft_pass(&mut kept, cfg.protected_tail);

    let summary =
        llm_summary.unwrap_or_else(|| deterministic_summary(&compacted, SUMMARY_CHAR_BUDGET));
    let tool_summary = tool_pattern_summary(&compacted);
    let mut text = format!("[Conversation summary]\n{summary}");
    if !tool_summary.is_empty() {
        text.push_str("\n\n");
        text.push_str(&tool_summary);
    }

    debug!(
        compacted = compacted.len(),
        kept = kept.len(),
        "windowed compaction"
    );

    out.messages = std::iter::once(Message::system(text)).chain(kept).collect();
    out
}

/// A tool result whose originating call fell outside the kept window must be
/// dropped with it; the summary already accounts for the call.
fn drop_orphan_tool_results(kept: &mut Vec<Message>) {
    let call_ids: HashSet<String> = kept
        .iter()
        .flat_map(|m| m.tool_call_ids().into_iter().map(str::to_string))
        .collect();
    for msg in kept.iter_mut() {
        msg.parts.retain(|p| match p {
            ContentPart::ToolResult { call_id, .. } => call_ids.contains(call_id),
            _ => true,
        });
    }
    kept.retain(|m| !m.parts.is_empty());
}

// ─── Deterministic summary ────────────────────────────────────────────────────

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[\w.-]+/[\w./-]+\.[A-Za-z0-9]{1,5}\b").unwrap())
}

const DECISION_PREFIXES: &[&str] = &[
    "I'll ", "I will ", "Let's ", "The fix is ", "We should ", "Decided ", "Plan:",
];

/// Extract the highest-signal content from compacted messages into a summary
/// bounded by `char_budget`: decision sentences, file paths, code blocks,
/// and each message's first and last sentence.  When no such signal exists,
/// fall back to a prefix slice of the raw text.
fn deterministic_summary(messages: &[Message], char_budget: usize) -> String {
    let mut lines: Vec<String> = Vec::new();

    // Decision sentences, in order of appearance.
    for msg in messages {
        for sentence in sentences(&msg.text_content()) {
            if DECISION_PREFIXES.iter().any(|p| sentence.starts_with(p)) {
                lines.push(sentence.to_string());
            }
        }
    }

    // Deduplicated file paths across the whole corpus.
    let mut paths: Vec<String> = Vec::new();
    for msg in messages {
        for m in file_path_re().find_iter(&msg.text_content()) {
            if !paths.iter().any(|p| p == m.as_str()) {
                paths.push(m.as_str().to_string());
            }
        }
    }
    if !paths.is_empty() {
        lines.push(format!("Files discussed: {}", paths.join(", ")));
    }

    // Code blocks, individually capped.
    for msg in messages {
        let text = msg.text_content();
        let mut inside = false;
        for segment in text.split("```") {
            if inside && !segment.trim().is_empty() {
                let block: String = segment.chars().take(CODE_BLOCK_CAP).collect();
                lines.push(format!("```\n{}\n```", block.trim()));
            }
            inside = !inside;
        }
    }

    // First and last sentence of each message.
    for msg in messages {
        let text = msg.text_content();
        let s = sentences(&text);
        if let Some(first) = s.first() {
            lines.push(first.to_string());
        }
        if s.len() > 1 {
            if let Some(last) = s.last() {
                lines.push(last.to_string());
            }
        }
    }

    if lines.is_empty() {
        // No sentence/path/code signal at all: raw prefix slice.
        let raw: String = messages
            .iter()
            .map(|m| m.text_content())
            .collect::<Vec<_>>()
            .join(" ");
        let prefix: String = raw.chars().take(char_budget).collect();
        return if raw.chars().count() > char_budget {
            format!("{prefix}...")
        } else {
            prefix
        };
    }

    // Dedup identical lines (first/last sentences often repeat decisions),
    // then pack up to the budget.
    let mut seen = HashSet::new();
    let mut packed = String::new();
    for line in lines {
        if !seen.insert(line.clone()) {
            continue;
        }
        if packed.chars().count() + line.chars().count() + 1 > char_budget {
            break;
        }
        if !packed.is_empty() {
            packed.push('\n');
        }
        packed.push_str(&line);
    }
    packed
}

fn sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

// ─── Tool pattern summary ─────────────────────────────────────────────────────

const READ_TOOLS: &[&str] = &[
    "read", "grep", "glob", "ls", "find", "cat", "head", "tail", "file_read", "file_search",
];
const WRITE_TOOLS: &[&str] = &[
    "write", "edit", "patch", "create", "delete", "move", "rename",
];
const BASH_TOOLS: &[&str] = &["bash", "bash_exec", "execute_command", "run_terminal_cmd"];

const PATH_ARG_KEYS: &[&str] = &["path", "file_path", "file", "filename", "target"];

/// Summarise tool usage across compacted messages into category lines:
/// files read, files written/edited, commands run, and a count per other
/// tool.  Arguments are parsed leniently — unparseable JSON is opaque and
/// only counts toward the tool tally.
pub fn tool_pattern_summary(messages: &[Message]) -> String {
    let mut reads: Vec<String> = Vec::new();
    let mut writes: Vec<String> = Vec::new();
    let mut commands: Vec<String> = Vec::new();
    let mut other: Vec<(String, usize)> = Vec::new();

    for msg in messages {
        for part in &msg.parts {
            let ContentPart::ToolCall { name, arguments, .. } = part else {
                continue;
            };
            let args: Option<serde_json::Value> = serde_json::from_str(arguments).ok();
            let lname = name.to_lowercase();
            if READ_TOOLS.contains(&lname.as_str()) {
                if let Some(p) = extract_path(args.as_ref()) {
                    if !reads.contains(&p) {
                        reads.push(p);
                    }
                }
            } else if WRITE_TOOLS.contains(&lname.as_str()) {
                if let Some(p) = extract_path(args.as_ref()) {
                    if !writes.contains(&p) {
                        writes.push(p);
                    }
                }
            } else if BASH_TOOLS.contains(&lname.as_str()) {
                if let Some(cmd) = args
                    .as_ref()
                    .and_then(|a| a.get("command"))
                    .and_then(|c| c.as_str())
                {
                    let capped: String = cmd.chars().take(COMMAND_CAP).collect();
                    commands.push(capped);
                }
            } else {
                match other.iter_mut().find(|(n, _)| n == name) {
                    Some((_, count)) => *count += 1,
                    None => other.push((name.clone(), 1)),
                }
            }
        }
    }

    let mut out: Vec<String> = Vec::new();
    if !reads.is_empty() {
        out.push(format!("Files read: {}", reads.join(", ")));
    }
    if !writes.is_empty() {
        out.push(format!("Files written/edited: {}", writes.join(", ")));
    }
    if !commands.is_empty() {
        out.push(format!("Commands run: {}", commands.join("; ")));
    }
    if !other.is_empty() {
        let counts: Vec<String> = other
            .iter()
            .map(|(n, c)| format!("{n}\u{00d7}{c}"))
            .collect();
        out.push(format!("Other tools: {}", counts.join(", ")));
    }
    out.join("\n")
}

fn extract_path(args: Option<&serde_json::Value>) -> Option<String> {
    let args = args?;
    for key in PATH_ARG_KEYS {
        if let Some(p) = args.get(key).and_then(|v| v.as_str()) {
            return Some(p.to_string());
        }
    }
    None
}

/// Serialise a message list into plain text for the summariser prompt.
pub fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
                Role::System => "System",
            };
            let body = m
                .parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::Thinking { .. } => "[thinking]".to_string(),
                    ContentPart::ToolCall { name, arguments, .. } => {
                        format!("[tool_call: {name}({arguments})]")
                    }
                    ContentPart::ToolResult { text, .. } => format!("[tool_result: {text}]"),
                    ContentPart::Image { mime, .. } => format!("[image: {mime}]"),
                })
                .collect::<Vec<_>>()
                .join(" ");
            format!("{role}: {body}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use sutra_config::CompactionConfig;
    use sutra_model::Role;

    fn small_cfg() -> CompactionConfig {
        CompactionConfig {
            context_limit: 1_000,
            recent_window: 6,
            hard_recent_window: 4,
            protected_tail: 2,
            summariser: None,
        }
    }

    fn state_with(messages: Vec<Message>) -> AgentState {
        let mut s = AgentState::new("anthropic", "sonnet");
        s.messages = messages;
        s
    }

    /// A state whose estimate lands at roughly `fraction` of a 1000-token
    /// limit (provider overhead included).
    fn state_at_fraction(fraction: f64) -> AgentState {
        let target_tokens = (1_000.0 * fraction) as usize;
        let body_tokens = target_tokens.saturating_sub(100 + 4);
        state_with(vec![Message::user("x".repeat(body_tokens * 4))])
    }

    // ── Tier bands ────────────────────────────────────────────────────────────

    #[test]
    fn tier_bands_match_utilization() {
        let cfg = small_cfg();
        assert_eq!(tier(&state_at_fraction(0.30), cfg.context_limit), CompactionTier::None);
        assert_eq!(tier(&state_at_fraction(0.65), cfg.context_limit), CompactionTier::Soft);
        assert_eq!(tier(&state_at_fraction(0.80), cfg.context_limit), CompactionTier::Medium);
        assert_eq!(tier(&state_at_fraction(0.95), cfg.context_limit), CompactionTier::Hard);
    }

    #[test]
    fn should_compact_at_80_percent() {
        let cfg = small_cfg();
        assert!(!should_compact(&state_at_fraction(0.70), cfg.context_limit));
        assert!(should_compact(&state_at_fraction(0.85), cfg.context_limit));
    }

    #[test]
    fn tier_none_is_identity() {
        let cfg = small_cfg();
        let state = state_at_fraction(0.3);
        let out = compact_tiered(&state, &cfg);
        assert_eq!(out.messages, state.messages);
        assert_eq!(out.system_prompt, state.system_prompt);
    }

    // ── Soft tier ─────────────────────────────────────────────────────────────

    #[test]
    fn soft_collapses_tool_args_and_truncates_results() {
        let long_result = "r".repeat(500);
        let mut messages = vec![
            Message::new(
                Role::Assistant,
                vec![ContentPart::tool_call("c1", "grep", r#"{"pattern":"very long args"}"#)],
            ),
            Message::new(Role::Tool, vec![ContentPart::tool_result("c1", &long_result, false)]),
        ];
        // Padding so the tool messages fall outside the protected tail.
        for i in 0..4 {
            messages.push(Message::user(format!("padding {i}")));
        }
        let mut state = state_with(messages);
        // Inflate to the soft band.
        state.messages.insert(0, Message::user("x".repeat(1600)));

        let cfg = small_cfg();
        assert_eq!(tier(&state, cfg.context_limit), CompactionTier::Soft);
        let out = compact_tiered(&state, &cfg);

        let call = out
            .messages
            .iter()
            .flat_map(|m| &m.parts)
            .find_map(|p| match p {
                ContentPart::ToolCall { arguments, .. } => Some(arguments.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call, "{}");

        let result = out
            .messages
            .iter()
            .flat_map(|m| &m.parts)
            .find_map(|p| match p {
                ContentPart::ToolResult { text, .. } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result.chars().count(), SOFT_RESULT_CAP + 3);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn soft_leaves_protected_tail_untouched() {
        let mut messages: Vec<Message> = (0..5)
            .map(|i| Message::user(format!("m{i}")))
            .collect();
        messages.push(Message::new(
            Role::Assistant,
            vec![ContentPart::tool_call("c9", "grep", r#"{"q":"tail"}"#)],
        ));
        let mut state = state_with(messages);
        state.messages.insert(0, Message::user("x".repeat(2300)));
        let cfg = small_cfg();
        assert_eq!(tier(&state, cfg.context_limit), CompactionTier::Soft);
        let out = compact_tiered(&state, &cfg);

        // The tool call is in the last 2 (protected) messages; args survive.
        let last = out.messages.last().unwrap();
        match &last.parts[0] {
            ContentPart::ToolCall { arguments, .. } => assert_eq!(arguments, r#"{"q":"tail"}"#),
            other => panic!("unexpected part {other:?}"),
        }
    }

    // ── Medium tier ───────────────────────────────────────────────────────────

    fn medium_state() -> AgentState {
        let mut messages = vec![Message::user("x".repeat(2260))]; // ~565 tokens
        for i in 0..10 {
            messages.push(Message::user(format!("question {i} about src/lib.rs.")));
            messages.push(Message::assistant(format!("answer {i}.")));
        }
        state_with(messages)
    }

    #[test]
    fn medium_keeps_window_and_prepends_system_summary() {
        let cfg = small_cfg();
        let state = medium_state();
        assert_eq!(tier(&state, cfg.context_limit), CompactionTier::Medium);
        let out = compact_tiered(&state, &cfg);

        assert_eq!(out.messages.len(), cfg.recent_window + 1);
        let summary = &out.messages[0];
        assert_eq!(summary.role, Role::System);
        assert_eq!(summary.parts.len(), 1, "summary is a single text part");
        assert!(summary.text_content().contains("[Conversation summary]"));
    }

    #[test]
    fn medium_keeps_most_recent_messages_verbatim() {
        let cfg = small_cfg();
        let state = medium_state();
        let out = compact_tiered(&state, &cfg);
        let last_in = state.messages.last().unwrap();
        let last_out = out.messages.last().unwrap();
        assert_eq!(last_in, last_out);
    }

    #[test]
    fn medium_summary_mentions_file_paths() {
        let cfg = small_cfg();
        let out = compact_tiered(&medium_state(), &cfg);
        assert!(
            out.messages[0].text_content().contains("src/lib.rs"),
            "summary should carry file paths from compacted turns"
        );
    }

    #[test]
    fn compaction_reduces_estimate() {
        let cfg = small_cfg();
        let state = medium_state();
        let out = compact_tiered(&state, &cfg);
        assert!(out.estimate_total_tokens() < state.estimate_total_tokens());
    }

    #[test]
    fn system_prompt_identity_preserved() {
        let cfg = small_cfg();
        let mut state = medium_state();
        state.system_prompt = Some("you are a coding agent".into());
        let out = compact_tiered(&state, &cfg);
        assert_eq!(out.system_prompt.as_deref(), Some("you are a coding agent"));
    }

    // ── Pairing invariant ─────────────────────────────────────────────────────

    #[test]
    fn orphan_tool_result_dropped_with_its_call() {
        let cfg = small_cfg();
        let mut messages = vec![Message::user("x".repeat(2600))];
        // The call will fall outside the kept window; its result just inside.
        messages.push(Message::new(
            Role::Assistant,
            vec![ContentPart::tool_call("orphan", "read", r#"{"path":"a.rs"}"#)],
        ));
        messages.push(Message::new(
            Role::Tool,
            vec![ContentPart::tool_result("orphan", "contents", false)],
        ));
        for i in 0..5 {
            messages.push(Message::user(format!("filler {i}")));
        }
        let state = state_with(messages);
        assert_eq!(tier(&state, cfg.context_limit), CompactionTier::Medium);
        let out = compact_tiered(&state, &cfg);

        let has_orphan_result = out.messages.iter().flat_map(|m| &m.parts).any(
            |p| matches!(p, ContentPart::ToolResult { call_id, .. } if call_id == "orphan"),
        );
        let has_orphan_call = out.messages.iter().flat_map(|m| &m.parts).any(
            |p| matches!(p, ContentPart::ToolCall { id, .. } if id == "orphan"),
        );
        assert!(!has_orphan_result, "result without its call must be dropped");
        assert!(!has_orphan_call);
    }

    #[test]
    fn paired_call_and_result_inside_window_survive() {
        let cfg = small_cfg();
        let mut messages = vec![Message::user("x".repeat(2600))];
        for i in 0..6 {
            messages.push(Message::user(format!("filler {i}")));
        }
        messages.push(Message::new(
            Role::Assistant,
            vec![ContentPart::tool_call("kept", "read", r#"{"path":"b.rs"}"#)],
        ));
        messages.push(Message::new(
            Role::Tool,
            vec![ContentPart::tool_result("kept", "data", false)],
        ));
        let state = state_with(messages);
        let out = compact_tiered(&state, &cfg);

        let call_kept = out.messages.iter().flat_map(|m| &m.parts).any(
            |p| matches!(p, ContentPart::ToolCall { id, .. } if id == "kept"),
        );
        let result_kept = out.messages.iter().flat_map(|m| &m.parts).any(
            |p| matches!(p, ContentPart::ToolResult { call_id, .. } if call_id == "kept"),
        );
        assert!(call_kept && result_kept);
    }

    // ── Hard tier ─────────────────────────────────────────────────────────────

    #[test]
    fn hard_uses_tighter_window() {
        let cfg = small_cfg();
        let mut messages = vec![Message::user("x".repeat(3700))];
        for i in 0..10 {
            messages.push(Message::user(format!("turn {i}")));
        }
        let state = state_with(messages);
        assert_eq!(tier(&state, cfg.context_limit), CompactionTier::Hard);
        let out = compact_tiered(&state, &cfg);
        assert_eq!(out.messages.len(), cfg.hard_recent_window + 1);
    }

    // ── Deterministic summary ─────────────────────────────────────────────────

    #[test]
    fn summary_extracts_decision_sentences() {
        let msgs = vec![Message::assistant(
            "I'll refactor the session module. It currently mixes concerns.",
        )];
        let s = deterministic_summary(&msgs, SUMMARY_CHAR_BUDGET);
        assert!(s.contains("I'll refactor the session module."));
    }

    #[test]
    fn summary_respects_char_budget() {
        let msgs: Vec<Message> = (0..100)
            .map(|i| Message::assistant(format!("I'll handle item number {i} next. Sure.")))
            .collect();
        let s = deterministic_summary(&msgs, 200);
        assert!(s.chars().count() <= 200);
    }

    #[test]
    fn summary_falls_back_to_prefix_slice() {
        // Tool-only messages carry no sentence/path/code signal.
        let msgs = vec![Message::new(
            Role::Tool,
            vec![ContentPart::tool_result("c", "", false)],
        )];
        let s = deterministic_summary(&msgs, 50);
        // Raw corpus is empty, so the slice is empty but defined.
        assert!(s.is_empty());
    }

    #[test]
    fn summary_quotes_code_blocks() {
        let msgs = vec![Message::assistant("see\n```\nfn x() {}\n```\ndone.")];
        let s = deterministic_summary(&msgs, SUMMARY_CHAR_BUDGET);
        assert!(s.contains("fn x() {}"));
    }

    // ── Tool pattern summary ──────────────────────────────────────────────────

    #[test]
    fn tool_summary_buckets_by_category() {
        let msgs = vec![Message::new(
            Role::Assistant,
            vec![
                ContentPart::tool_call("1", "read", r#"{"path":"src/a.rs"}"#),
                ContentPart::tool_call("2", "edit", r#"{"file_path":"src/b.rs"}"#),
                ContentPart::tool_call("3", "bash", r#"{"command":"cargo test"}"#),
                ContentPart::tool_call("4", "web_fetch", r#"{"url":"http://x"}"#),
                ContentPart::tool_call("5", "web_fetch", r#"{"url":"http://y"}"#),
            ],
        )];
        let s = tool_pattern_summary(&msgs);
        assert!(s.contains("Files read: src/a.rs"));
        assert!(s.contains("Files written/edited: src/b.rs"));
        assert!(s.contains("Commands run: cargo test"));
        assert!(s.contains("Other tools: web_fetch\u{00d7}2"));
    }

    #[test]
    fn tool_summary_dedupes_paths() {
        let msgs = vec![Message::new(
            Role::Assistant,
            vec![
                ContentPart::tool_call("1", "read", r#"{"path":"same.rs"}"#),
                ContentPart::tool_call("2", "read", r#"{"path":"same.rs"}"#),
            ],
        )];
        let s = tool_pattern_summary(&msgs);
        assert_eq!(s.matches("same.rs").count(), 1);
    }

    #[test]
    fn tool_summary_caps_commands_at_120_chars() {
        let long_cmd = "a".repeat(400);
        let msgs = vec![Message::new(
            Role::Assistant,
            vec![ContentPart::tool_call(
                "1",
                "bash",
                format!(r#"{{"command":"{long_cmd}"}}"#),
            )],
        )];
        let s = tool_pattern_summary(&msgs);
        let line = s.lines().find(|l| l.starts_with("Commands run:")).unwrap();
        assert!(line.len() < 140);
    }

    #[test]
    fn tool_summary_tolerates_malformed_json() {
        let msgs = vec![Message::new(
            Role::Assistant,
            vec![ContentPart::tool_call("1", "read", "{not json")],
        )];
        let s = tool_pattern_summary(&msgs);
        // Opaque args: no path extracted, no panic, no line emitted.
        assert!(!s.contains("Files read"));
    }

    #[test]
    fn tool_summary_empty_without_tool_calls() {
        let msgs = vec![Message::user("no tools here")];
        assert!(tool_pattern_summary(&msgs).is_empty());
    }

    // ── Emergency compaction ──────────────────────────────────────────────────

    #[test]
    fn emergency_keeps_tail_plus_notice() {
        let cfg = small_cfg();
        let msgs: Vec<Message> = (0..10).map(|i| Message::user(format!("m{i}"))).collect();
        let out = emergency_compact(&state_with(msgs), &cfg);
        assert_eq!(out.messages.len(), cfg.protected_tail + 1);
        assert!(out.messages[0]
            .text_content()
            .contains("emergency-compacted"));
        assert_eq!(out.messages.last().unwrap().as_text(), Some("m9"));
    }

    // ── History serialisation ─────────────────────────────────────────────────

    #[test]
    fn serialize_history_skips_system_and_labels_roles() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("question"),
            Message::assistant("answer"),
        ];
        let text = serialize_history(&msgs);
        assert!(!text.contains("sys"));
        assert!(text.contains("User: question"));
        assert!(text.contains("Assistant: answer"));
    }

    #[test]
    fn serialize_history_renders_tool_parts() {
        let msgs = vec![
            Message::new(
                Role::Assistant,
                vec![ContentPart::tool_call("c", "shell", r#"{"command":"ls"}"#)],
            ),
            Message::tool_result("c", "file1\nfile2"),
        ];
        let text = serialize_history(&msgs);
        assert!(text.contains("[tool_call: shell"));
        assert!(text.contains("[tool_result: file1"));
    }
}
