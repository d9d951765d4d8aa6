// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Character-based token estimation.
//!
//! Deliberately cheap: no tokenizer model, no allocation beyond what the
//! caller already holds.  The 4-chars-per-token heuristic over-counts CJK
//! and under-counts dense code slightly, which is acceptable for budget
//! decisions — compaction thresholds leave a 20% margin.

use crate::{ContentPart, Message, ToolSchema};

/// Flat token cost charged per message for role/framing overhead.
pub const PER_MESSAGE_OVERHEAD: usize = 4;

/// Flat token cost charged once per request for provider framing.
pub const PROVIDER_OVERHEAD: usize = 100;

/// Fixed token estimate for an inline image, regardless of size.
pub const IMAGE_TOKENS: usize = 1000;

/// `ceil(chars / 4)`.
fn chars_to_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Token estimate for a single content part.
pub fn part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } | ContentPart::Thinking { text } => chars_to_tokens(text.len()),
        ContentPart::ToolCall { name, arguments, .. } => {
            chars_to_tokens(name.len() + arguments.len())
        }
        ContentPart::ToolResult { text, .. } => chars_to_tokens(text.len()),
        ContentPart::Image { .. } => IMAGE_TOKENS,
    }
}

/// Token estimate for one message including per-message overhead.
pub fn message_tokens(msg: &Message) -> usize {
    PER_MESSAGE_OVERHEAD + msg.parts.iter().map(part_tokens).sum::<usize>()
}

/// Token estimate for a set of tool definitions.
///
/// Schemas are serialised verbatim into the request, so the estimate covers
/// name + description + JSON schema length, inflated by 15% for the framing
/// the provider wraps around each definition.
pub fn tools_tokens(tools: &[ToolSchema]) -> usize {
    tools
        .iter()
        .map(|t| {
            let chars = t.name.len() + t.description.len() + t.input_schema.to_string().len();
            ((chars as f64) * 1.15 / 4.0).ceil() as usize
        })
        .sum()
}

/// Total token estimate for a full request: messages, system prompt, tool
/// definitions, and provider overhead.
///
/// Always ≥ [`PROVIDER_OVERHEAD`], even for an empty request.
pub fn estimate_total_tokens(
    messages: &[Message],
    system_prompt: Option<&str>,
    tools: &[ToolSchema],
) -> usize {
    let msg_total: usize = messages.iter().map(message_tokens).sum();
    let system = system_prompt.map(|s| chars_to_tokens(s.len())).unwrap_or(0);
    PROVIDER_OVERHEAD + msg_total + system + tools_tokens(tools)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
