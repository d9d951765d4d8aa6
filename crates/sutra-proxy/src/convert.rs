// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Envelope conversion between the source wire format and upstream formats.
//!
//! The source format is the `/v1/messages` chat envelope: a `system` string,
//! a `messages` array whose entries carry either a plain string or typed
//! content blocks (`text`, `tool_use`, `tool_result`, `image`), and a
//! `tools` array with JSON-Schema `input_schema` entries.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use sutra_config::WireFormat;

use crate::alias::ResolvedTarget;
use crate::ProxyError;

// ─── Source envelope ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRequest {
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub system: Option<Value>,
    pub messages: Vec<SourceMessage>,
    #[serde(default)]
    pub tools: Vec<SourceTool>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceMessage {
    pub role: String,
    pub content: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

impl SourceRequest {
    pub fn parse(body: &[u8], max_bytes: usize) -> Result<Self, ProxyError> {
        if body.len() > max_bytes {
            return Err(ProxyError::RequestTooLarge {
                size: body.len(),
                limit: max_bytes,
            });
        }
        serde_json::from_slice(body).map_err(|e| ProxyError::MalformedRequest(e.to_string()))
    }

    /// The system prompt as plain text (string or text-block array form).
    pub fn system_text(&self) -> Option<String> {
        match &self.system {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(blocks)) => Some(
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            _ => None,
        }
    }
}

/// Iterate a message's content as typed blocks; a bare string becomes one
/// text block.
fn content_blocks(content: &Value) -> Vec<Value> {
    match content {
        Value::String(s) => vec![json!({ "type": "text", "text": s })],
        Value::Array(blocks) => blocks.clone(),
        other => vec![json!({ "type": "text", "text": other.to_string() })],
    }
}

fn block_type(block: &Value) -> &str {
    block.get("type").and_then(Value::as_str).unwrap_or("text")
}

/// Effective max_tokens after the per-provider cap.
fn capped_max_tokens(req: &SourceRequest, target: &ResolvedTarget) -> u32 {
    let requested = req.max_tokens.unwrap_or(4096);
    match target.config.max_tokens_cap {
        Some(cap) => requested.min(cap),
        None => requested,
    }
}

// ─── Request conversion ───────────────────────────────────────────────────────

/// Convert the source envelope into the target provider's request body.
pub fn convert_request(req: &SourceRequest, target: &ResolvedTarget) -> Value {
    match target.config.format {
        WireFormat::Passthrough => passthrough_request(req, target),
        WireFormat::Openai => to_openai_request(req, target),
        WireFormat::Google => to_google_request(req, target),
    }
}

/// Passthrough forwards the envelope with only the model name rewritten.
fn passthrough_request(req: &SourceRequest, target: &ResolvedTarget) -> Value {
    let mut body = serde_json::to_value(PassthroughView(req)).unwrap_or_else(|_| json!({}));
    body["model"] = json!(target.model);
    body["max_tokens"] = json!(capped_max_tokens(req, target));
    body
}

/// SourceRequest is Deserialize-only; rebuild the envelope by hand for the
/// passthrough path so unknown fields are not silently invented.
struct PassthroughView<'a>(&'a SourceRequest);

impl serde::Serialize for PassthroughView<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let req = self.0;
        let mut map = Map::new();
        map.insert("model".into(), json!(req.model));
        if let Some(t) = req.temperature {
            map.insert("temperature".into(), json!(t));
        }
        if let Some(s) = &req.system {
            map.insert("system".into(), s.clone());
        }
        map.insert(
            "messages".into(),
            Value::Array(
                req.messages
                    .iter()
                    .map(|m| json!({ "role": m.role, "content": m.content }))
                    .collect(),
            ),
        );
        if !req.tools.is_empty() {
            map.insert(
                "tools".into(),
                Value::Array(
                    req.tools
                        .iter()
                        .map(|t| {
                            json!({
                                "name": t.name,
                                "description": t.description,
                                "input_schema": t.input_schema,
                            })
                        })
                        .collect(),
                ),
            );
        }
        map.insert("stream".into(), json!(req.stream));
        Value::Object(map).serialize(serializer)
    }
}

fn to_openai_request(req: &SourceRequest, target: &ResolvedTarget) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = req.system_text() {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for m in &req.messages {
        let blocks = content_blocks(&m.content);
        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        for block in &blocks {
            match block_type(block) {
                "text" => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        text_parts.push(t);
                    }
                }
                "tool_use" => {
                    tool_calls.push(json!({
                        "id": block.get("id").cloned().unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": block.get("name").cloned().unwrap_or_default(),
                            "arguments": block
                                .get("input")
                                .map(|v| v.to_string())
                                .unwrap_or_else(|| "{}".into()),
                        }
                    }));
                }
                "tool_result" => {
                    let content = block
                        .get("content")
                        .map(render_tool_result_content)
                        .unwrap_or_default();
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": block.get("tool_use_id").cloned().unwrap_or_default(),
                        "content": content,
                    }));
                }
                _ => {}
            }
        }
        if !text_parts.is_empty() || !tool_calls.is_empty() {
            let role = match m.role.as_str() {
                "assistant" => "assistant",
                _ => "user",
            };
            let mut msg = json!({ "role": role, "content": text_parts.join("\n") });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = Value::Array(tool_calls);
                if text_parts.is_empty() {
                    msg["content"] = Value::Null;
                }
            }
            messages.push(msg);
        }
    }

    let mut body = json!({
        "model": target.model,
        "messages": messages,
        "max_tokens": capped_max_tokens(req, target),
        "stream": req.stream,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if req.stream {
        body["stream_options"] = json!({ "include_usage": true });
    }
    if !req.tools.is_empty() {
        body["tools"] = Value::Array(
            req.tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect(),
        );
    }
    body
}

fn render_tool_result_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

fn to_google_request(req: &SourceRequest, target: &ResolvedTarget) -> Value {
    let mut contents: Vec<Value> = Vec::new();

    // Gemini matches function responses to calls by name; map ids to names.
    let mut call_names: std::collections::HashMap<String, String> = Default::default();
    for m in &req.messages {
        for block in content_blocks(&m.content) {
            if block_type(&block) == "tool_use" {
                if let (Some(id), Some(name)) = (
                    block.get("id").and_then(Value::as_str),
                    block.get("name").and_then(Value::as_str),
                ) {
                    call_names.insert(id.to_string(), name.to_string());
                }
            }
        }
    }

    for m in &req.messages {
        let role = if m.role == "assistant" { "model" } else { "user" };
        let mut parts: Vec<Value> = Vec::new();
        for block in content_blocks(&m.content) {
            match block_type(&block) {
                "text" => {
                    if let Some(t) = block.get("text").and_then(Value::as_str) {
                        parts.push(json!({ "text": t }));
                    }
                }
                "tool_use" => {
                    parts.push(json!({
                        "functionCall": {
                            "name": block.get("name").cloned().unwrap_or_default(),
                            "args": block.get("input").cloned().unwrap_or(json!({})),
                        }
                    }));
                }
                "tool_result" => {
                    let id = block
                        .get("tool_use_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let name = call_names.get(id).cloned().unwrap_or_else(|| id.to_string());
                    parts.push(json!({
                        "functionResponse": {
                            "name": name,
                            "response": {
                                "result": block
                                    .get("content")
                                    .map(render_tool_result_content)
                                    .unwrap_or_default()
                            },
                        }
                    }));
                }
                _ => {}
            }
        }
        if !parts.is_empty() {
            contents.push(json!({ "role": role, "parts": parts }));
        }
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "maxOutputTokens": capped_max_tokens(req, target),
        }
    });
    if let Some(t) = req.temperature {
        body["generationConfig"]["temperature"] = json!(t);
    }
    if let Some(system) = req.system_text() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if !req.tools.is_empty() {
        let declarations: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    body
}

// ─── Non-streaming response conversion ────────────────────────────────────────

/// Convert a complete upstream response body into the source format.
pub fn convert_response(body: &Value, format: WireFormat, model: &str) -> Value {
    match format {
        WireFormat::Passthrough => body.clone(),
        WireFormat::Openai => openai_response_to_source(body, model),
        WireFormat::Google => google_response_to_source(body, model),
    }
}

fn openai_response_to_source(body: &Value, model: &str) -> Value {
    let choice = &body["choices"][0];
    let message = &choice["message"];
    let mut content: Vec<Value> = Vec::new();
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            content.push(json!({ "type": "text", "text": text }));
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let args = call["function"]["arguments"].as_str().unwrap_or("{}");
            content.push(json!({
                "type": "tool_use",
                "id": call["id"],
                "name": call["function"]["name"],
                "input": serde_json::from_str::<Value>(args).unwrap_or(json!({})),
            }));
        }
    }
    let stop_reason = match choice["finish_reason"].as_str() {
        Some("tool_calls") => "tool_use",
        Some("length") => "max_tokens",
        _ => "end_turn",
    };
    json!({
        "id": body["id"].as_str().unwrap_or("msg_proxy"),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            "output_tokens": body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        }
    })
}

fn google_response_to_source(body: &Value, model: &str) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut saw_function_call = false;
    if let Some(parts) = body["candidates"][0]["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                content.push(json!({ "type": "text", "text": text }));
            } else if part.get("functionCall").is_some() {
                saw_function_call = true;
                content.push(json!({
                    "type": "tool_use",
                    "id": format!("call_{}", content.len()),
                    "name": part["functionCall"]["name"],
                    "input": part["functionCall"]["args"],
                }));
            }
        }
    }
    let stop_reason = if saw_function_call {
        "tool_use"
    } else {
        match body["candidates"][0]["finishReason"].as_str() {
            Some("MAX_TOKENS") => "max_tokens",
            _ => "end_turn",
        }
    };
    json!({
        "id": "msg_proxy",
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
            "output_tokens": body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
        }
    })
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
