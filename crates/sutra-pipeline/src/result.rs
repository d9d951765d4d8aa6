// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agents::{Plan, ReviewIssue, StepOutcome};
use crate::git::DiffStats;
use crate::progress::Phase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
    pub recoverable: bool,
}

/// Usage aggregated across every coder/debugger invocation in the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    pub cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_calls: HashMap<String, u64>,
    pub turns: u32,
}

impl AggregateStats {
    pub fn absorb(&mut self, outcome: &StepOutcome) {
        self.cost += outcome.cost;
        self.input_tokens += outcome.input_tokens;
        self.output_tokens += outcome.output_tokens;
        self.turns += outcome.turns;
        for (tool, count) in &outcome.tool_calls {
            *self.tool_calls.entry(tool.clone()).or_insert(0) += count;
        }
    }
}

/// Everything a finished orchestration run reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub success: bool,
    pub summary: String,
    pub plan: Option<Plan>,
    /// Phase name → wall-clock duration; phases run strictly sequentially
    /// so the timings are disjoint.
    pub phase_timings_ms: HashMap<String, u64>,
    pub stats: AggregateStats,
    /// Deduplicated, first-mention order.
    pub modified_files: Vec<String>,
    pub created_files: Vec<String>,
    pub coding_results: Vec<StepOutcome>,
    pub review_issues: Vec<ReviewIssue>,
    pub validation_passed: Option<bool>,
    pub diff_preview: Option<String>,
    pub diff_stats: Option<DiffStats>,
    pub feature_branch: Option<String>,
    pub original_branch: Option<String>,
    pub stash_ref: Option<String>,
    pub commits: Vec<String>,
    pub errors: Vec<PhaseError>,
    pub elapsed_ms: u64,
}

/// Dedup preserving first occurrence; file lists behave as ordered sets.
pub fn dedup_files(files: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    files.retain(|f| seen.insert(f.clone()));
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_accumulates_stats() {
        let mut stats = AggregateStats::default();
        let mut outcome = StepOutcome {
            cost: 0.5,
            input_tokens: 100,
            output_tokens: 40,
            turns: 2,
            success: true,
            ..Default::default()
        };
        outcome.tool_calls.insert("edit".into(), 3);
        stats.absorb(&outcome);
        stats.absorb(&outcome);
        assert_eq!(stats.cost, 1.0);
        assert_eq!(stats.input_tokens, 200);
        assert_eq!(stats.turns, 4);
        assert_eq!(stats.tool_calls.get("edit"), Some(&6));
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let mut files = vec![
            "a.rs".to_string(),
            "b.rs".to_string(),
            "a.rs".to_string(),
            "c.rs".to_string(),
            "b.rs".to_string(),
        ];
        dedup_files(&mut files);
        assert_eq!(files, vec!["a.rs", "b.rs", "c.rs"]);
    }
}
