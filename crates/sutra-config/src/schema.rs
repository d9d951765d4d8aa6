// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub autonomy: AutonomyConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

// ─── Model binding ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier for the orchestrating agent (e.g. "anthropic").
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Base URL override.  Useful for local proxies and gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".into(),
            name: "claude-sonnet".into(),
            api_key_env: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

// ─── Router ───────────────────────────────────────────────────────────────────

fn default_linucb_alpha() -> f64 {
    1.0
}
fn default_max_conversation_depth() -> usize {
    50
}
fn default_max_memory_hits() -> usize {
    20
}
fn default_tier_costs() -> [f64; 4] {
    // Relative cost per call: no-llm, haiku, sonnet, opus.
    [0.0, 0.25, 3.0, 15.0]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// LinUCB exploration weight.  Higher values explore cheaper tiers more
    /// aggressively before the posterior narrows.
    #[serde(default = "default_linucb_alpha")]
    pub linucb_alpha: f64,
    /// Relative cost per call, indexed by tier order (no-llm..opus).
    #[serde(default = "default_tier_costs")]
    pub tier_costs: [f64; 4],
    /// Conversation depth at which the depth feature saturates (×2).
    #[serde(default = "default_max_conversation_depth")]
    pub max_conversation_depth: usize,
    /// Memory hit count at which the memory-load feature saturates.
    #[serde(default = "default_max_memory_hits")]
    pub max_memory_hits: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            linucb_alpha: default_linucb_alpha(),
            tier_costs: default_tier_costs(),
            max_conversation_depth: default_max_conversation_depth(),
            max_memory_hits: default_max_memory_hits(),
        }
    }
}

// ─── Compaction ───────────────────────────────────────────────────────────────

fn default_context_limit() -> usize {
    200_000
}
fn default_recent_window() -> usize {
    20
}
fn default_hard_recent_window() -> usize {
    10
}
fn default_protected_tail() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Context window budget in tokens for the orchestrating model.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    /// Messages kept verbatim by medium-tier compaction.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,
    /// Tighter window used by hard-tier compaction.
    #[serde(default = "default_hard_recent_window")]
    pub hard_recent_window: usize,
    /// The most recent messages are never compacted away, at any tier.
    #[serde(default = "default_protected_tail")]
    pub protected_tail: usize,
    /// Optional local model used to write hard-tier summaries.
    /// When absent (or unreachable) the deterministic summary is used.
    #[serde(default)]
    pub summariser: Option<SummariserConfig>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            context_limit: default_context_limit(),
            recent_window: default_recent_window(),
            hard_recent_window: default_hard_recent_window(),
            protected_tail: default_protected_tail(),
            summariser: None,
        }
    }
}

fn default_summariser_model() -> String {
    "llama3.2".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummariserConfig {
    /// Base URL of an ollama-compatible server, e.g. `http://localhost:11434`.
    pub endpoint: String,
    #[serde(default = "default_summariser_model")]
    pub model: String,
}

// ─── Mesh ─────────────────────────────────────────────────────────────────────

fn default_max_mailbox_size() -> usize {
    256
}
fn default_ttl_ms() -> u64 {
    30_000
}
fn default_ask_timeout_ms() -> u64 {
    10_000
}
fn default_max_agents() -> usize {
    64
}
fn default_heartbeat_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Upper bound on envelopes queued per actor across all priority lanes.
    #[serde(default = "default_max_mailbox_size")]
    pub max_mailbox_size: usize,
    /// Envelopes older than this are dropped at pop time.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    #[serde(default = "default_ask_timeout_ms")]
    pub default_ask_timeout_ms: u64,
    /// Registry capacity; `register` past this fails unless re-registering.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Registry sweep marks agents offline after this heartbeat silence.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            max_mailbox_size: default_max_mailbox_size(),
            default_ttl_ms: default_ttl_ms(),
            default_ask_timeout_ms: default_ask_timeout_ms(),
            max_agents: default_max_agents(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

// ─── Autonomy ─────────────────────────────────────────────────────────────────

fn default_tool_disable_threshold() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_metrics_window() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    /// Consecutive failures after which a tool is disabled.
    #[serde(default = "default_tool_disable_threshold")]
    pub tool_disable_threshold: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Ring-buffer capacity for per-turn latency/error metrics.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            tool_disable_threshold: default_tool_disable_threshold(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            metrics_window: default_metrics_window(),
        }
    }
}

// ─── Checkpoints ──────────────────────────────────────────────────────────────

fn default_max_checkpoints() -> usize {
    5
}
fn default_checkpoint_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Checkpoint directory.  `~` is expanded.  Defaults to
    /// `~/.local/state/sutra/checkpoints`.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_checkpoints: default_max_checkpoints(),
            interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

impl CheckpointConfig {
    /// Checkpoint directory with `~`/env expansion applied, falling back to
    /// the platform state directory.
    pub fn resolved_dir(&self) -> std::path::PathBuf {
        match &self.dir {
            Some(raw) => crate::expand_path(raw),
            None => dirs::state_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("sutra/checkpoints"),
        }
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

/// Which phases the orchestration run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    /// Plan, branch, execute, validate, review, commit.
    #[default]
    Full,
    /// Plan, execute, validate — no branch, review, or commit.
    Execute,
    /// Stop after planning; the plan becomes the result summary.
    PlanOnly,
}

fn default_branch_prefix() -> String {
    "feat/".into()
}
fn default_branch_template() -> String {
    "{prefix}{slug}".into()
}
fn default_max_review_cycles() -> u32 {
    2
}
fn default_max_debug_cycles() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub mode: PipelineMode,
    /// Build/test/lint commands for the validate phase; autodetected from the
    /// working tree when absent.
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub test_command: Option<String>,
    #[serde(default)]
    pub lint_command: Option<String>,
    #[serde(default = "default_true")]
    pub create_branch: bool,
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    #[serde(default = "default_true")]
    pub self_review: bool,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// `{prefix}` and `{slug}` are substituted.
    #[serde(default = "default_branch_template")]
    pub branch_template: String,
    #[serde(default = "default_max_review_cycles")]
    pub max_review_cycles: u32,
    #[serde(default = "default_max_debug_cycles")]
    pub max_debug_cycles: u32,
    /// Abort the whole orchestration after this long.  `None` = no timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Appended to the task prompt each turn.
    #[serde(default)]
    pub additional_context: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Full,
            build_command: None,
            test_command: None,
            lint_command: None,
            create_branch: true,
            auto_commit: true,
            self_review: true,
            branch_prefix: default_branch_prefix(),
            branch_template: default_branch_template(),
            max_review_cycles: default_max_review_cycles(),
            max_debug_cycles: default_max_debug_cycles(),
            timeout_ms: None,
            additional_context: None,
        }
    }
}

// ─── Proxy ────────────────────────────────────────────────────────────────────

fn default_max_request_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_upstream_timeout_ms() -> u64 {
    120_000
}
fn default_upstream_retries() -> u32 {
    2
}

/// Wire format spoken by an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Forward the source envelope unchanged.
    #[default]
    Passthrough,
    /// OpenAI chat-completions format.
    Openai,
    /// Google generateContent format.
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub format: WireFormat,
    /// Model names served by this provider.  An empty list makes the
    /// provider a wildcard fallback for otherwise unresolvable models.
    #[serde(default)]
    pub models: Vec<String>,
    /// Cap applied to the request's max_tokens for this provider's models.
    #[serde(default)]
    pub max_tokens_cap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Requests larger than this are rejected before parsing completes.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,
    /// Retries on upstream 5xx/429 responses.
    #[serde(default = "default_upstream_retries")]
    pub max_retries: u32,
    /// Shared secret checked against the `x-proxy-key` header when set.
    #[serde(default)]
    pub shared_secret: Option<String>,
    /// alias → "provider/model" target.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub providers: HashMap<String, ProxyProviderConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: default_max_request_bytes(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            max_retries: default_upstream_retries(),
            shared_secret: None,
            aliases: HashMap::new(),
            providers: HashMap::new(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
