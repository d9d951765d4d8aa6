// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ContentPart, Message, ResponseEvent, Role};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// A model backend the core drives.
///
/// Implementations must be cancellation-aware: dropping the returned stream
/// cancels the upstream request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider id for status display (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Non-streaming completion: drains [`Provider::stream`] into a single
    /// assistant [`Message`].  Tool-call deltas with the same id are merged
    /// by appending their argument fragments.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<Message> {
        use futures::StreamExt;

        let mut stream = self.stream(req).await?;
        let mut text = String::new();
        let mut thinking = String::new();
        let mut calls: Vec<(String, String, String)> = Vec::new();
        while let Some(ev) = stream.next().await {
            match ev? {
                ResponseEvent::TextDelta(t) => text.push_str(&t),
                ResponseEvent::ThinkingDelta(t) => thinking.push_str(&t),
                ResponseEvent::ToolCall { id, name, arguments } => {
                    match calls.iter_mut().find(|(cid, _, _)| *cid == id) {
                        Some((_, _, args)) => args.push_str(&arguments),
                        None => calls.push((id, name, arguments)),
                    }
                }
                ResponseEvent::Done => break,
                // Non-text events don't contribute to an assembled message.
                ResponseEvent::ToolResult { .. }
                | ResponseEvent::Image { .. }
                | ResponseEvent::Error(_) => {}
            }
        }

        let mut parts = Vec::new();
        if !thinking.is_empty() {
            parts.push(ContentPart::thinking(thinking));
        }
        if !text.is_empty() {
            parts.push(ContentPart::text(text));
        }
        for (id, name, args) in calls {
            parts.push(ContentPart::tool_call(id, name, args));
        }
        Ok(Message::new(Role::Assistant, parts))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
