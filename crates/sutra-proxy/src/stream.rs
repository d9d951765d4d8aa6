// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SSE mirroring: upstream provider events re-emitted in the source wire
//! format, one line-boundary at a time.
//!
//! Per-request state machine:
//!
//! ```text
//! Init ── first upstream event ──▶ Receiving
//! Receiving ── text delta ───────▶ Text
//! Receiving/Text ── tool start ──▶ Tool
//! any ── terminal event ─────────▶ Stop
//! any ── upstream failure ───────▶ Error
//! ```

use serde_json::{json, Value};
use uuid::Uuid;

use sutra_config::WireFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Receiving,
    Text,
    Tool,
    Stop,
    Error,
}

/// Carries partial SSE lines across TCP chunk boundaries.  Only complete
/// `\n`-terminated lines are released; the remainder waits for more bytes.
#[derive(Default)]
pub struct SseLineBuffer {
    buf: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line = self.buf[..pos].trim_end_matches('\r').to_string();
            self.buf.drain(..=pos);
            lines.push(line);
        }
        lines
    }
}

fn frame(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Re-emits one upstream SSE stream in the source format.
pub struct StreamMirror {
    format: WireFormat,
    model: String,
    message_id: String,
    state: StreamState,
    block_index: u32,
    block_open: bool,
    stop_reason: &'static str,
    output_tokens: u64,
    input_tokens: u64,
}

impl StreamMirror {
    pub fn new(format: WireFormat, model: impl Into<String>) -> Self {
        Self {
            format,
            model: model.into(),
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            state: StreamState::Init,
            block_index: 0,
            block_open: false,
            stop_reason: "end_turn",
            output_tokens: 0,
            input_tokens: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Transform one complete upstream line into zero or more source-format
    /// SSE frames.
    pub fn on_line(&mut self, line: &str) -> Vec<String> {
        if matches!(self.state, StreamState::Stop | StreamState::Error) {
            return Vec::new();
        }
        match self.format {
            // Passthrough streams are piped verbatim by the service; this
            // path only exists for completeness.
            WireFormat::Passthrough => vec![format!("{line}\n")],
            WireFormat::Openai => self.on_openai_line(line),
            WireFormat::Google => self.on_google_line(line),
        }
    }

    /// Emit a source-format error event and close the stream.
    pub fn on_error(&mut self, code: &str, message: &str) -> Vec<String> {
        self.state = StreamState::Error;
        vec![frame(
            "error",
            &json!({ "type": "error", "error": { "type": code, "message": message } }),
        )]
    }

    /// Close the stream if the upstream ended without a terminal event.
    pub fn finish(&mut self) -> Vec<String> {
        match self.state {
            StreamState::Stop | StreamState::Error | StreamState::Init => Vec::new(),
            _ => self.terminate(),
        }
    }

    // ── Shared emission helpers ───────────────────────────────────────────────

    fn ensure_message_start(&mut self, out: &mut Vec<String>) {
        if self.state != StreamState::Init {
            return;
        }
        self.state = StreamState::Receiving;
        out.push(frame(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "usage": { "input_tokens": self.input_tokens, "output_tokens": 0 },
                }
            }),
        ));
    }

    fn close_block(&mut self, out: &mut Vec<String>) {
        if self.block_open {
            out.push(frame(
                "content_block_stop",
                &json!({ "type": "content_block_stop", "index": self.block_index }),
            ));
            self.block_open = false;
            self.block_index += 1;
        }
    }

    fn open_text_block(&mut self, out: &mut Vec<String>) {
        out.push(frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": { "type": "text", "text": "" },
            }),
        ));
        self.block_open = true;
        self.state = StreamState::Text;
    }

    fn open_tool_block(&mut self, out: &mut Vec<String>, id: &str, name: &str) {
        out.push(frame(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.block_index,
                "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} },
            }),
        ));
        self.block_open = true;
        self.state = StreamState::Tool;
    }

    fn text_delta(&mut self, out: &mut Vec<String>, text: &str) {
        if self.state != StreamState::Text {
            self.close_block(out);
            self.open_text_block(out);
        }
        out.push(frame(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": { "type": "text_delta", "text": text },
            }),
        ));
    }

    fn json_delta(&mut self, out: &mut Vec<String>, partial: &str) {
        out.push(frame(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.block_index,
                "delta": { "type": "input_json_delta", "partial_json": partial },
            }),
        ));
    }

    fn terminate(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        self.close_block(&mut out);
        out.push(frame(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": { "stop_reason": self.stop_reason },
                "usage": { "output_tokens": self.output_tokens },
            }),
        ));
        out.push(frame("message_stop", &json!({ "type": "message_stop" })));
        self.state = StreamState::Stop;
        out
    }

    // ── OpenAI upstream ───────────────────────────────────────────────────────

    fn on_openai_line(&mut self, line: &str) -> Vec<String> {
        let Some(data) = line.strip_prefix("data: ") else {
            return Vec::new();
        };
        let data = data.trim();
        if data == "[DONE]" {
            let mut out = Vec::new();
            self.ensure_message_start(&mut out);
            out.extend(self.terminate());
            return out;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        self.ensure_message_start(&mut out);

        if let Some(usage) = chunk.get("usage") {
            if let Some(n) = usage["completion_tokens"].as_u64() {
                self.output_tokens = n;
            }
            if let Some(n) = usage["prompt_tokens"].as_u64() {
                self.input_tokens = n;
            }
        }

        let delta = &chunk["choices"][0]["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                self.text_delta(&mut out, text);
            }
        }
        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let name = call["function"]["name"].as_str().unwrap_or("");
                let id = call["id"].as_str().unwrap_or("");
                if !name.is_empty() || !id.is_empty() {
                    self.close_block(&mut out);
                    self.open_tool_block(&mut out, id, name);
                }
                if let Some(args) = call["function"]["arguments"].as_str() {
                    if !args.is_empty() {
                        self.json_delta(&mut out, args);
                    }
                }
            }
        }
        if let Some(reason) = chunk["choices"][0]["finish_reason"].as_str() {
            self.stop_reason = match reason {
                "tool_calls" => "tool_use",
                "length" => "max_tokens",
                _ => "end_turn",
            };
        }
        out
    }

    // ── Google upstream ───────────────────────────────────────────────────────

    fn on_google_line(&mut self, line: &str) -> Vec<String> {
        let Some(data) = line.strip_prefix("data: ") else {
            return Vec::new();
        };
        let data = data.trim();
        if data == "[DONE]" {
            let mut out = Vec::new();
            self.ensure_message_start(&mut out);
            out.extend(self.terminate());
            return out;
        }
        let Ok(chunk) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        self.ensure_message_start(&mut out);

        if let Some(usage) = chunk.get("usageMetadata") {
            if let Some(n) = usage["candidatesTokenCount"].as_u64() {
                self.output_tokens = n;
            }
            if let Some(n) = usage["promptTokenCount"].as_u64() {
                self.input_tokens = n;
            }
        }

        if let Some(parts) = chunk["candidates"][0]["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        self.text_delta(&mut out, text);
                    }
                } else if let Some(call) = part.get("functionCall") {
                    self.close_block(&mut out);
                    let id = format!("call_{}", self.block_index);
                    let name = call["name"].as_str().unwrap_or("");
                    self.open_tool_block(&mut out, &id, name);
                    let args = call.get("args").cloned().unwrap_or(json!({}));
                    self.json_delta(&mut out, &args.to_string());
                    self.stop_reason = "tool_use";
                }
            }
        }

        if chunk["candidates"][0]["finishReason"].as_str().is_some() {
            if self.stop_reason == "end_turn"
                && chunk["candidates"][0]["finishReason"].as_str() == Some("MAX_TOKENS")
            {
                self.stop_reason = "max_tokens";
            }
            out.extend(self.terminate());
        }
        out
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
