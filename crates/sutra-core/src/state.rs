// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sutra_model::{tokens, Message, ThinkingLevel, ToolSchema};

/// The full conversational state owned by one agent.
///
/// Exactly one agent instance owns a given state; mutation happens only
/// through the owning agent (append on model turn, append on tool result).
/// Nothing here is shared or locked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub model_id: String,
    pub provider_id: String,
    pub tools: Vec<ToolSchema>,
    pub system_prompt: Option<String>,
    pub thinking: ThinkingLevel,
    pub streaming: bool,
}

impl AgentState {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            model_id: model_id.into(),
            provider_id: provider_id.into(),
            tools: Vec::new(),
            system_prompt: None,
            thinking: ThinkingLevel::Off,
            streaming: true,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    /// Total token estimate for the state as it would be sent upstream.
    pub fn estimate_total_tokens(&self) -> usize {
        tokens::estimate_total_tokens(
            &self.messages,
            self.system_prompt.as_deref(),
            &self.tools,
        )
    }

    /// Fraction of the context budget consumed (0.0 when the limit is 0).
    pub fn utilization(&self, context_limit: usize) -> f64 {
        if context_limit == 0 {
            return 0.0;
        }
        self.estimate_total_tokens() as f64 / context_limit as f64
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_states_have_unique_session_ids() {
        let a = AgentState::new("anthropic", "sonnet");
        let b = AgentState::new("anthropic", "sonnet");
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn empty_state_still_costs_provider_overhead() {
        let s = AgentState::new("anthropic", "sonnet");
        assert!(s.estimate_total_tokens() >= 100);
    }

    #[test]
    fn push_grows_the_estimate() {
        let mut s = AgentState::new("anthropic", "sonnet");
        let before = s.estimate_total_tokens();
        s.push(Message::user("a reasonably sized message body"));
        assert!(s.estimate_total_tokens() > before);
    }

    #[test]
    fn utilization_zero_limit_does_not_divide() {
        let s = AgentState::new("anthropic", "sonnet");
        assert_eq!(s.utilization(0), 0.0);
    }

    #[test]
    fn utilization_scales_inverse_to_limit() {
        let mut s = AgentState::new("anthropic", "sonnet");
        s.push(Message::user("x".repeat(400)));
        assert!(s.utilization(1_000) > s.utilization(100_000));
    }

    #[test]
    fn system_prompt_counts_toward_estimate() {
        let bare = AgentState::new("anthropic", "sonnet");
        let with = AgentState::new("anthropic", "sonnet").with_system_prompt("p".repeat(400));
        assert!(with.estimate_total_tokens() > bare.estimate_total_tokens());
    }
}
