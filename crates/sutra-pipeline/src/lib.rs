// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod agents;
mod git;
mod orchestrator;
mod progress;
mod result;

pub use agents::{
    Coder, CommandOutput, CommandRunner, Complexity, Debugger, Plan, PlanStep, Planner,
    ReviewIssue, ReviewReport, Reviewer, Severity, StepOutcome,
};
pub use git::{
    branch_name, parse_diff_stats, slugify, truncate_diff, DiffStats, GitRunner,
    DIFF_PREVIEW_LIMIT, DIFF_TRUNCATION_SENTINEL,
};
pub use orchestrator::{Orchestrator, RecorderSink};
pub use progress::{ApprovalCallback, CommitMessageFn, Phase, ProgressEvent, ProgressSink};
pub use result::{dedup_files, AggregateStats, OrchestratorResult, PhaseError};
