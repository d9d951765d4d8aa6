// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Pipeline phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Planning,
    Branching,
    Executing,
    Validating,
    Reviewing,
    Committing,
    Done,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Planning => "planning",
            Phase::Branching => "branching",
            Phase::Executing => "executing",
            Phase::Validating => "validating",
            Phase::Reviewing => "reviewing",
            Phase::Committing => "committing",
            Phase::Done => "done",
            Phase::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    pub message: String,
    pub elapsed_ms: u64,
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Approval gate for destructive actions (branch, commit, rollback).
/// Absent callback = proceed; a panicking callback also proceeds — a buggy
/// UI must never block the pipeline.
pub type ApprovalCallback = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Produces the commit message for a task and its changed files.  The
/// pipeline assumes nothing about the format beyond non-emptiness.
pub type CommitMessageFn = Arc<dyn Fn(&str, &[String]) -> String + Send + Sync>;

// ─── Unit tests ───────────────────────────────────────────────────────────────
