// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a message.
///
/// Messages are ordered sequences of parts rather than a single string so
/// that one assistant turn can carry text, reasoning, and tool calls side by
/// side, and so that compaction can rewrite individual parts in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    /// Model reasoning streamed via the extended-thinking API.  Never shown
    /// to tools; counted against the context budget like text.
    Thinking {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// JSON-encoded argument object, kept as a string so that partially
        /// streamed or malformed arguments survive round-trips verbatim.
        arguments: String,
    },
    ToolResult {
        call_id: String,
        text: String,
        #[serde(default)]
        is_error: bool,
    },
    Image {
        /// MIME type, e.g. `image/png`.
        mime: String,
        /// Base64 payload without a data-URL prefix.
        data: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            text: text.into(),
            is_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Carrier for tool outputs fed back to the model.
    #[serde(rename = "tool_result")]
    Tool,
}

// ─── Message ──────────────────────────────────────────────────────────────────

/// A single message in the conversation history.
///
/// Invariant: a `ToolResult` part's `call_id` references a `ToolCall` part
/// that appears earlier in the same conversation.  The message itself cannot
/// enforce this; [`crate::tokens`] consumers and the recovery walk in the
/// autonomy layer validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable opaque id, unique within a session.
    pub id: String,
    pub role: Role,
    pub parts: Vec<ContentPart>,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
}

impl Message {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::Tool, vec![ContentPart::tool_result(call_id, text, false)])
    }

    pub fn tool_error(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::Tool, vec![ContentPart::tool_result(call_id, text, true)])
    }

    /// Return the plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [ContentPart::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// Concatenation of all text parts (thinking and tool parts excluded).
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Ids of every `ToolCall` part in this message.
    pub fn tool_call_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Call ids referenced by every `ToolResult` part in this message.
    pub fn tool_result_call_ids(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::ToolCall { .. }))
    }
}

// ─── Thinking level ───────────────────────────────────────────────────────────

/// How much extended reasoning the agent requests from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

// ─── Tool schema & requests ───────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub input_schema: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
    pub stream: bool,
}

/// A single streamed event from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// A text delta streamed from the model
    TextDelta(String),
    /// A thinking/reasoning delta
    ThinkingDelta(String),
    /// The model wants to call a tool
    ToolCall {
        id: String,
        name: String,
        /// Accumulated JSON arguments (may arrive across multiple deltas)
        arguments: String,
    },
    /// A tool result replayed through the stream (rare; proxies use it)
    ToolResult {
        call_id: String,
        text: String,
        is_error: bool,
    },
    /// Inline image content
    Image { mime: String, data: String },
    /// The stream finished normally
    Done,
    /// A recoverable error (non-fatal warning)
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn message_ids_are_unique() {
        let a = Message::user("x");
        let b = Message::user("x");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn message_timestamp_is_positive() {
        let m = Message::assistant("y");
        assert!(m.timestamp_ms > 0);
    }

    #[test]
    fn tool_result_constructor_sets_call_id() {
        let m = Message::tool_result("call-1", "output");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_result_call_ids(), vec!["call-1"]);
    }

    #[test]
    fn tool_error_flags_is_error() {
        let m = Message::tool_error("call-1", "boom");
        match &m.parts[0] {
            ContentPart::ToolResult { is_error, .. } => assert!(is_error),
            other => panic!("wrong part: {other:?}"),
        }
    }

    #[test]
    fn as_text_none_for_multi_part() {
        let m = Message::new(
            Role::Assistant,
            vec![ContentPart::text("a"), ContentPart::thinking("b")],
        );
        assert!(m.as_text().is_none());
    }

    #[test]
    fn text_content_skips_thinking_and_tools() {
        let m = Message::new(
            Role::Assistant,
            vec![
                ContentPart::thinking("reasoning"),
                ContentPart::text("answer"),
                ContentPart::tool_call("c1", "grep", "{}"),
            ],
        );
        assert_eq!(m.text_content(), "answer");
    }

    #[test]
    fn tool_call_ids_collects_all_calls() {
        let m = Message::new(
            Role::Assistant,
            vec![
                ContentPart::tool_call("c1", "grep", "{}"),
                ContentPart::tool_call("c2", "read", "{}"),
            ],
        );
        assert_eq!(m.tool_call_ids(), vec!["c1", "c2"]);
        assert!(m.has_tool_calls());
    }

    // ── Serialisation ─────────────────────────────────────────────────────────

    #[test]
    fn role_tool_serialises_as_tool_result() {
        let json = serde_json::to_string(&Role::Tool).unwrap();
        assert_eq!(json, "\"tool_result\"");
    }

    #[test]
    fn message_round_trips_through_json() {
        let original = Message::new(
            Role::Assistant,
            vec![
                ContentPart::text("t"),
                ContentPart::tool_call("c1", "shell", r#"{"command":"ls"}"#),
            ],
        );
        let json = serde_json::to_string(&original).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn tool_result_is_error_defaults_to_false() {
        let json = r#"{"type":"tool_result","call_id":"c1","text":"ok"}"#;
        let p: ContentPart = serde_json::from_str(json).unwrap();
        assert_eq!(p, ContentPart::tool_result("c1", "ok", false));
    }

    #[test]
    fn content_part_tag_is_snake_case() {
        let p = ContentPart::tool_call("c1", "grep", "{}");
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"type\":\"tool_call\""), "got: {json}");
    }
}
