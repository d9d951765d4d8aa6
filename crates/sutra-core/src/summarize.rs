// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use sutra_config::SummariserConfig;

const SUMMARY_PROMPT: &str = "You are a context compaction assistant for a software \
     engineering agent. Summarise the conversation below in a concise, \
     information-dense way. Preserve file paths, function names, error \
     messages, decisions, and anything needed to continue the work correctly. \
     The summary replaces the original history.";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an ollama-compatible local model used to write hard-tier
/// compaction summaries.
pub struct LocalSummariser {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

impl LocalSummariser {
    pub fn new(cfg: &SummariserConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            client: reqwest::Client::new(),
        }
    }

    /// Ask the local model for a summary of `conversation` (with the tool
    /// usage digest appended for context).  Any HTTP or decode failure is an
    /// error — the caller falls back to the deterministic summary.
    pub async fn summarise(
        &self,
        conversation: &str,
        tool_summary: &str,
    ) -> anyhow::Result<String> {
        let prompt = format!("{SUMMARY_PROMPT}\n\n---\n\n{conversation}\n\n{tool_summary}");
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {},
        });

        debug!(endpoint = %self.endpoint, model = %self.model, "requesting summary");
        let resp = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .context("summariser request failed")?;

        if !resp.status().is_success() {
            bail!("summariser error {}", resp.status());
        }
        let decoded: GenerateResponse = resp
            .json()
            .await
            .context("summariser returned malformed JSON")?;
        Ok(decoded.response)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
