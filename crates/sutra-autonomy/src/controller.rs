// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use sutra_config::AutonomyConfig;
use sutra_core::AgentState;
use sutra_model::{ContentPart, Message};

use crate::errors::ErrorClass;
use crate::events::{AutonomyEvent, EventSink};
use crate::retry::with_retry;

#[derive(Debug, Default, Clone)]
struct ToolHealth {
    consecutive_failures: u32,
    disabled: bool,
}

#[derive(Debug, Clone, Copy)]
struct TurnMetric {
    latency_ms: u64,
    error: bool,
    #[allow(dead_code)]
    class: Option<ErrorClass>,
}

/// Aggregate health over the metrics window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub total_turns: usize,
    pub total_errors: usize,
    pub uptime_ms: u64,
    pub degradation_reasons: Vec<String>,
}

/// Keeps an agent running unattended: tracks tool reliability, degraded
/// mode, turn metrics, and a last-known-good snapshot for recovery.
pub struct AutonomyController {
    cfg: AutonomyConfig,
    tools: Mutex<HashMap<String, ToolHealth>>,
    degraded: Mutex<HashSet<String>>,
    metrics: Mutex<VecDeque<TurnMetric>>,
    snapshot: Mutex<Option<Vec<Message>>>,
    started: Instant,
    sink: Option<EventSink>,
}

impl AutonomyController {
    pub fn new(cfg: AutonomyConfig) -> Self {
        Self::with_event_sink(cfg, None)
    }

    pub fn with_event_sink(cfg: AutonomyConfig, sink: Option<EventSink>) -> Self {
        Self {
            cfg,
            tools: Mutex::new(HashMap::new()),
            degraded: Mutex::new(HashSet::new()),
            metrics: Mutex::new(VecDeque::new()),
            snapshot: Mutex::new(None),
            started: Instant::now(),
            sink,
        }
    }

    fn emit(&self, event: AutonomyEvent) {
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    /// Retry wrapper with this controller's backoff settings and event sink.
    pub async fn with_retry<T, F, Fut>(&self, op: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        with_retry(
            op,
            self.cfg.max_retries,
            self.cfg.base_delay_ms,
            self.cfg.max_delay_ms,
            self.sink.as_ref(),
        )
        .await
    }

    // ── Tool health ───────────────────────────────────────────────────────────

    /// Record one tool invocation.  Consecutive failures past the threshold
    /// disable the tool; the first success re-enables it and clears the
    /// counter.
    pub fn on_tool_used(&self, name: &str, _args: &Value, is_error: bool) {
        let mut tools = self.tools.lock().unwrap();
        let health = tools.entry(name.to_string()).or_default();
        if is_error {
            health.consecutive_failures += 1;
            if !health.disabled && health.consecutive_failures >= self.cfg.tool_disable_threshold {
                health.disabled = true;
                warn!(tool = name, failures = health.consecutive_failures, "tool disabled");
                self.emit(AutonomyEvent::ToolDisabled(name.to_string()));
            }
        } else {
            if health.disabled {
                debug!(tool = name, "tool re-enabled after success");
                self.emit(AutonomyEvent::ToolReenabled(name.to_string()));
            }
            health.consecutive_failures = 0;
            health.disabled = false;
        }
    }

    pub fn is_tool_disabled(&self, name: &str) -> bool {
        self.tools
            .lock()
            .unwrap()
            .get(name)
            .map(|h| h.disabled)
            .unwrap_or(false)
    }

    pub fn disabled_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, h)| h.disabled)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    // ── Degraded mode ─────────────────────────────────────────────────────────

    pub fn enter_degraded_mode(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.degraded.lock().unwrap().insert(reason.clone()) {
            warn!(%reason, "entering degraded mode");
            self.emit(AutonomyEvent::DegradedModeEntered(reason));
        }
    }

    pub fn exit_degraded_mode(&self, reason: &str) {
        if self.degraded.lock().unwrap().remove(reason) {
            self.emit(AutonomyEvent::DegradedModeExited(reason.to_string()));
        }
    }

    /// Active iff at least one reason is outstanding.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.lock().unwrap().is_empty()
    }

    // ── Turn metrics ──────────────────────────────────────────────────────────

    pub fn record_turn(&self, latency_ms: u64, error: bool, class: Option<ErrorClass>) {
        let mut metrics = self.metrics.lock().unwrap();
        if metrics.len() >= self.cfg.metrics_window {
            metrics.pop_front();
        }
        metrics.push_back(TurnMetric {
            latency_ms,
            error,
            class,
        });
    }

    pub fn health_report(&self) -> HealthReport {
        let metrics = self.metrics.lock().unwrap();
        let total_turns = metrics.len();
        let total_errors = metrics.iter().filter(|m| m.error).count();
        let avg_latency_ms = if total_turns == 0 {
            0.0
        } else {
            metrics.iter().map(|m| m.latency_ms as f64).sum::<f64>() / total_turns as f64
        };
        let error_rate = if total_turns == 0 {
            0.0
        } else {
            total_errors as f64 / total_turns as f64
        };
        let mut degradation_reasons: Vec<String> =
            self.degraded.lock().unwrap().iter().cloned().collect();
        degradation_reasons.sort();
        HealthReport {
            avg_latency_ms,
            error_rate,
            total_turns,
            total_errors,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            degradation_reasons,
        }
    }

    // ── Context recovery ──────────────────────────────────────────────────────

    /// Capture the message log before a turn so a corrupted state can be
    /// restored afterwards.
    pub fn before_turn(&self, state: &AgentState) {
        *self.snapshot.lock().unwrap() = Some(state.messages.clone());
    }

    /// Keep the longest prefix of valid messages.  A message is valid when
    /// its id is non-empty, it has content, its timestamp is positive, and
    /// every tool result references a tool call seen earlier in the walk.
    ///
    /// When not even the first message is valid, fall back to the snapshot
    /// captured by [`AutonomyController::before_turn`] (or an empty log).
    pub fn recover_context(&self, state: &AgentState) -> AgentState {
        let mut seen_calls: HashSet<&str> = HashSet::new();
        let mut valid_len = 0usize;
        'walk: for msg in &state.messages {
            if msg.id.is_empty() || msg.parts.is_empty() || msg.timestamp_ms <= 0 {
                break;
            }
            for part in &msg.parts {
                match part {
                    ContentPart::ToolCall { id, .. } => {
                        seen_calls.insert(id);
                    }
                    ContentPart::ToolResult { call_id, .. } => {
                        if !seen_calls.contains(call_id.as_str()) {
                            break 'walk;
                        }
                    }
                    _ => {}
                }
            }
            valid_len += 1;
        }

        let mut out = state.clone();
        if valid_len > 0 {
            out.messages.truncate(valid_len);
        } else {
            let snapshot = self.snapshot.lock().unwrap().clone();
            out.messages = snapshot.unwrap_or_default();
            debug!(
                restored = out.messages.len(),
                "no valid prefix, restored last-known-good snapshot"
            );
        }
        out
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
