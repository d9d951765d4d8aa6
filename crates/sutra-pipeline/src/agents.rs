// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Plans ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// What the planner agent returns for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub relevant_files: Vec<String>,
    pub complexity: Complexity,
    #[serde(default)]
    pub requires_new_files: bool,
    #[serde(default)]
    pub test_suggestion: Option<String>,
    #[serde(default)]
    pub dependency_hints: Vec<String>,
}

impl Plan {
    /// Human-readable rendering used as the plan-only summary.
    pub fn render(&self) -> String {
        let mut out = format!("Plan: {} steps ({:?})\n", self.steps.len(), self.complexity);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, step.description));
        }
        if let Some(test) = &self.test_suggestion {
            out.push_str(&format!("  Test: {test}\n"));
        }
        out
    }
}

// ─── Step outcomes ────────────────────────────────────────────────────────────

/// What one coder/debugger invocation produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutcome {
    pub summary: String,
    #[serde(default)]
    pub modified_files: Vec<String>,
    #[serde(default)]
    pub created_files: Vec<String>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    /// Tool name → invocation count.
    #[serde(default)]
    pub tool_calls: HashMap<String, u64>,
    #[serde(default)]
    pub turns: u32,
    pub success: bool,
}

// ─── Review ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewReport {
    pub issues: Vec<ReviewIssue>,
    /// Produced when the reviewer believes the critical issues are fixable
    /// in one round; drives the fix→review loop.
    #[serde(default)]
    pub fix_prompt: Option<String>,
}

// ─── Agent traits ─────────────────────────────────────────────────────────────

/// Produces a plan for a task.  External collaborator; typically backed by
/// an LLM agent.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, task: &str, context: Option<&str>) -> anyhow::Result<Plan>;
}

/// Executes plan steps against the working tree.
#[async_trait]
pub trait Coder: Send + Sync {
    async fn execute_step(
        &self,
        step: &PlanStep,
        plan: &Plan,
        task: &str,
    ) -> anyhow::Result<StepOutcome>;

    /// Interrupt the in-flight step (timeout path).  Default: no-op.
    async fn abort(&self) {}
}

/// Turns a validation failure log into a fix attempt.
#[async_trait]
pub trait Debugger: Send + Sync {
    async fn fix(&self, failure_log: &str) -> anyhow::Result<StepOutcome>;
}

/// Reviews a diff for bugs and security problems.
#[async_trait]
pub trait Reviewer: Send + Sync {
    async fn review(&self, diff: &str) -> anyhow::Result<ReviewReport>;
}

/// Runs one shell command for the validate phase.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> anyhow::Result<CommandOutput>;
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_render_starts_with_plan_prefix() {
        let plan = Plan {
            steps: vec![
                PlanStep { description: "read the module".into(), files: vec![] },
                PlanStep { description: "write the summary".into(), files: vec![] },
            ],
            relevant_files: vec![],
            complexity: Complexity::Small,
            requires_new_files: false,
            test_suggestion: Some("cargo test -p auth".into()),
            dependency_hints: vec![],
        };
        let text = plan.render();
        assert!(text.starts_with("Plan:"), "got: {text}");
        assert!(text.contains("1. read the module"));
        assert!(text.contains("cargo test -p auth"));
    }

    #[test]
    fn severity_orders_warning_below_critical() {
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn plan_deserializes_with_defaults() {
        let json = r#"{"steps":[{"description":"x"}],"complexity":"medium"}"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(!plan.requires_new_files);
        assert!(plan.dependency_hints.is_empty());
    }
}
