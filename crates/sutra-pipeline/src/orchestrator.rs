// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{debug, warn};

use sutra_config::{OrchestratorConfig, PipelineMode};

use crate::agents::{Coder, CommandRunner, Debugger, Planner, Reviewer, ReviewReport, Severity};
use crate::git::{branch_name, parse_diff_stats, slugify, truncate_diff, GitRunner};
use crate::progress::{ApprovalCallback, CommitMessageFn, Phase, ProgressEvent, ProgressSink};
use crate::result::{dedup_files, AggregateStats, OrchestratorResult, PhaseError};

/// Review reports are clamped to this many issues.
const MAX_REVIEW_ISSUES: usize = 10;

pub type RecorderSink = Arc<dyn Fn(&OrchestratorResult) + Send + Sync>;

/// Drives the plan → branch → execute → validate → review → commit pipeline
/// over external agent and git collaborators.
///
/// The orchestrator owns no model or filesystem state of its own; every
/// effect goes through an injected trait object, which is what makes the
/// whole pipeline drivable by mocks.
pub struct Orchestrator {
    cfg: OrchestratorConfig,
    workdir: PathBuf,
    planner: Arc<dyn Planner>,
    coder: Arc<dyn Coder>,
    debugger: Option<Arc<dyn Debugger>>,
    reviewer: Option<Arc<dyn Reviewer>>,
    git: Option<Arc<dyn GitRunner>>,
    commands: Option<Arc<dyn CommandRunner>>,
    on_progress: Option<ProgressSink>,
    on_approval: Option<ApprovalCallback>,
    commit_message: Option<CommitMessageFn>,
    on_record: Option<RecorderSink>,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        workdir: impl Into<PathBuf>,
        planner: Arc<dyn Planner>,
        coder: Arc<dyn Coder>,
    ) -> Self {
        Self {
            cfg,
            workdir: workdir.into(),
            planner,
            coder,
            debugger: None,
            reviewer: None,
            git: None,
            commands: None,
            on_progress: None,
            on_approval: None,
            commit_message: None,
            on_record: None,
        }
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn Reviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    pub fn with_git(mut self, git: Arc<dyn GitRunner>) -> Self {
        self.git = Some(git);
        self
    }

    pub fn with_command_runner(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn on_progress(mut self, sink: ProgressSink) -> Self {
        self.on_progress = Some(sink);
        self
    }

    pub fn on_approval(mut self, cb: ApprovalCallback) -> Self {
        self.on_approval = Some(cb);
        self
    }

    pub fn with_commit_message(mut self, f: CommitMessageFn) -> Self {
        self.commit_message = Some(f);
        self
    }

    pub fn on_record(mut self, sink: RecorderSink) -> Self {
        self.on_record = Some(sink);
        self
    }

    // ── Run ───────────────────────────────────────────────────────────────────

    /// Run the pipeline for one task.  Never panics and never returns `Err`:
    /// every failure is folded into the result.
    pub async fn run(&self, task: &str) -> OrchestratorResult {
        let started = Instant::now();
        let mut result = OrchestratorResult::default();

        let outcome = match self.cfg.timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(
                    Duration::from_millis(ms),
                    self.run_phases(task, &mut result, started),
                )
                .await
                {
                    Ok(r) => r,
                    Err(_) => {
                        self.coder.abort().await;
                        Err((Phase::Error, anyhow!("orchestration timed out after {ms} ms")))
                    }
                }
            }
            None => self.run_phases(task, &mut result, started).await,
        };

        if let Err((phase, err)) = outcome {
            self.progress(Phase::Error, None, None, err.to_string(), started);
            result.errors.push(PhaseError {
                phase,
                message: err.to_string(),
                recoverable: false,
            });
            result.success = false;
            result.summary = format!("Orchestration failed: {err}");
            self.rollback(&mut result).await;
        }

        self.finalize(&mut result, started);
        result
    }

    async fn run_phases(
        &self,
        task: &str,
        result: &mut OrchestratorResult,
        started: Instant,
    ) -> Result<(), (Phase, anyhow::Error)> {
        // ── 1. Plan ───────────────────────────────────────────────────────────
        let t = Instant::now();
        self.progress(Phase::Planning, None, None, "planning task", started);
        let plan = self
            .planner
            .plan(task, self.cfg.additional_context.as_deref())
            .await
            .map_err(|e| (Phase::Planning, e))?;
        self.mark(result, Phase::Planning, t);

        if plan.steps.is_empty() {
            result.plan = Some(plan);
            result.errors.push(PhaseError {
                phase: Phase::Planning,
                message: "planner returned no steps".into(),
                recoverable: true,
            });
            result.summary =
                "The planner produced no steps for this task; nothing to execute.".into();
            return Ok(());
        }
        result.plan = Some(plan.clone());

        if self.cfg.mode == PipelineMode::PlanOnly {
            result.success = true;
            result.summary = plan.render();
            return Ok(());
        }

        // ── 2. Branch ─────────────────────────────────────────────────────────
        if self.cfg.mode == PipelineMode::Full && self.cfg.create_branch {
            if let Some(git) = &self.git {
                if git.detect_repo(&self.workdir).await {
                    let t = Instant::now();
                    let branch = branch_name(
                        &self.cfg.branch_template,
                        &self.cfg.branch_prefix,
                        &slugify(task),
                    );
                    self.progress(Phase::Branching, None, None, branch.clone(), started);
                    if self.approve("create-branch", &branch) {
                        if let Err(e) = self.create_branch(git, &branch, result).await {
                            // Non-fatal: the run continues on the current
                            // branch.
                            warn!(error = %e, "branch creation failed");
                            result.errors.push(PhaseError {
                                phase: Phase::Branching,
                                message: e.to_string(),
                                recoverable: true,
                            });
                        }
                    }
                    self.mark(result, Phase::Branching, t);
                }
            }
        }

        // ── 3. Execute ────────────────────────────────────────────────────────
        let t = Instant::now();
        let total = plan.steps.len() as u32;
        for (i, step) in plan.steps.iter().enumerate() {
            self.progress(
                Phase::Executing,
                Some(i as u32 + 1),
                Some(total),
                step.description.clone(),
                started,
            );
            let outcome = self
                .coder
                .execute_step(step, &plan, task)
                .await
                .map_err(|e| (Phase::Executing, e))?;
            result.modified_files.extend(outcome.modified_files.iter().cloned());
            result.created_files.extend(outcome.created_files.iter().cloned());
            result.coding_results.push(outcome);
        }
        self.mark(result, Phase::Executing, t);

        // ── 4. Validate ───────────────────────────────────────────────────────
        let commands = self.validation_commands();
        if let Some(runner) = self.commands.clone().filter(|_| !commands.is_empty()) {
            let t = Instant::now();
            self.progress(Phase::Validating, None, None, "build + test + lint", started);
            let mut failure = self.run_validation(&runner, &commands).await;
            let mut cycles = 0u32;
            while failure.is_some() && cycles < self.cfg.max_debug_cycles {
                let Some(debugger) = &self.debugger else {
                    break;
                };
                cycles += 1;
                self.progress(
                    Phase::Validating,
                    Some(cycles),
                    Some(self.cfg.max_debug_cycles),
                    "debugging validation failure",
                    started,
                );
                let log = failure.clone().unwrap_or_default();
                match debugger.fix(&log).await {
                    Ok(outcome) => {
                        result.modified_files.extend(outcome.modified_files.iter().cloned());
                        result.created_files.extend(outcome.created_files.iter().cloned());
                        result.coding_results.push(outcome);
                    }
                    Err(e) => {
                        warn!(error = %e, "debug agent failed");
                        break;
                    }
                }
                failure = self.run_validation(&runner, &commands).await;
            }
            let passed = failure.is_none();
            result.validation_passed = Some(passed);
            self.mark(result, Phase::Validating, t);
            if !passed {
                let log = failure.unwrap_or_default();
                let first_line = log.lines().next().unwrap_or("validation failed");
                result.errors.push(PhaseError {
                    phase: Phase::Validating,
                    message: format!(
                        "validation still failing after {cycles} debug cycle(s): {first_line}"
                    ),
                    recoverable: true,
                });
                result.summary = "Validation failed; changes were left uncommitted.".into();
                return Ok(());
            }
        }

        // ── 5. Review ─────────────────────────────────────────────────────────
        if self.cfg.mode == PipelineMode::Full && self.cfg.self_review {
            if let Some(reviewer) = &self.reviewer {
                let t = Instant::now();
                self.progress(Phase::Reviewing, None, None, "self-review", started);
                let mut report = reviewer
                    .review(&self.current_diff().await)
                    .await
                    .map_err(|e| (Phase::Reviewing, e))?;
                clamp_report(&mut report);

                let mut rounds = 0u32;
                while rounds < self.cfg.max_review_cycles
                    && report.issues.iter().any(|i| i.severity == Severity::Critical)
                {
                    let Some(prompt) = report.fix_prompt.clone() else {
                        break;
                    };
                    let Some(debugger) = &self.debugger else {
                        break;
                    };
                    rounds += 1;
                    self.progress(
                        Phase::Reviewing,
                        Some(rounds),
                        Some(self.cfg.max_review_cycles),
                        "fixing critical review findings",
                        started,
                    );
                    match debugger.fix(&prompt).await {
                        Ok(outcome) => {
                            result.modified_files.extend(outcome.modified_files.iter().cloned());
                            result.coding_results.push(outcome);
                        }
                        Err(e) => {
                            warn!(error = %e, "review fix attempt failed");
                            break;
                        }
                    }
                    report = reviewer
                        .review(&self.current_diff().await)
                        .await
                        .map_err(|e| (Phase::Reviewing, e))?;
                    clamp_report(&mut report);
                }
                result.review_issues = report.issues;
                self.mark(result, Phase::Reviewing, t);
            }
        }

        // ── 6. Diff preview ───────────────────────────────────────────────────
        if !result.modified_files.is_empty() || !result.created_files.is_empty() {
            let diff = self.current_diff().await;
            if !diff.is_empty() {
                result.diff_stats = Some(parse_diff_stats(&diff));
                result.diff_preview = Some(truncate_diff(&diff));
            }
        }

        // ── 7. Commit ─────────────────────────────────────────────────────────
        if self.cfg.mode == PipelineMode::Full && self.cfg.auto_commit {
            if let Some(git) = &self.git {
                if git.detect_repo(&self.workdir).await {
                    let t = Instant::now();
                    let mut files = result.modified_files.clone();
                    files.extend(result.created_files.iter().cloned());
                    dedup_files(&mut files);
                    let message = self.render_commit_message(task, &files);
                    self.progress(Phase::Committing, None, None, message.clone(), started);
                    if self.approve("commit", &message) {
                        git.exec(&["add", "-A"], &self.workdir)
                            .await
                            .map_err(|e| (Phase::Committing, e))?;
                        git.exec(&["commit", "-m", &message], &self.workdir)
                            .await
                            .map_err(|e| (Phase::Committing, e))?;
                        let hash = git
                            .exec(&["rev-parse", "HEAD"], &self.workdir)
                            .await
                            .map_err(|e| (Phase::Committing, e))?;
                        result.commits.push(hash.trim().to_string());
                    }
                    self.mark(result, Phase::Committing, t);
                }
            }
        }

        result.success = true;
        if result.summary.is_empty() {
            result.summary = format!(
                "Completed {} plan step(s); {} file(s) touched.",
                plan.steps.len(),
                result.modified_files.len() + result.created_files.len()
            );
        }
        Ok(())
    }

    // ── Phase helpers ─────────────────────────────────────────────────────────

    async fn create_branch(
        &self,
        git: &Arc<dyn GitRunner>,
        branch: &str,
        result: &mut OrchestratorResult,
    ) -> anyhow::Result<()> {
        let original = git
            .exec(&["rev-parse", "--abbrev-ref", "HEAD"], &self.workdir)
            .await?;
        // A stash ref lets the error path restore uncommitted work exactly.
        let stash = git.exec(&["stash", "create"], &self.workdir).await?;
        if !stash.trim().is_empty() {
            result.stash_ref = Some(stash.trim().to_string());
        }
        git.exec(&["checkout", "-b", branch], &self.workdir).await?;
        result.original_branch = Some(original.trim().to_string());
        result.feature_branch = Some(branch.to_string());
        Ok(())
    }

    /// Build/test/lint commands: explicit config first, else autodetected
    /// from the working tree.
    fn validation_commands(&self) -> Vec<String> {
        let configured: Vec<String> = [
            self.cfg.build_command.clone(),
            self.cfg.test_command.clone(),
            self.cfg.lint_command.clone(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !configured.is_empty() {
            return configured;
        }
        if self.workdir.join("Cargo.toml").is_file() {
            return vec![
                "cargo build".into(),
                "cargo test".into(),
                "cargo clippy".into(),
            ];
        }
        if self.workdir.join("package.json").is_file() {
            return vec!["npm test".into()];
        }
        if self.workdir.join("Makefile").is_file() {
            return vec!["make".into()];
        }
        Vec::new()
    }

    /// Run the validation commands in order; the first failure produces the
    /// failure log handed to the debug agent.
    async fn run_validation(
        &self,
        runner: &Arc<dyn CommandRunner>,
        commands: &[String],
    ) -> Option<String> {
        for command in commands {
            match runner.run(command).await {
                Ok(out) if out.success => continue,
                Ok(out) => return Some(format!("$ {command}\n{}", out.output)),
                Err(e) => return Some(format!("$ {command}\n{e}")),
            }
        }
        None
    }

    async fn current_diff(&self) -> String {
        match &self.git {
            Some(git) if git.detect_repo(&self.workdir).await => {
                git.diff(&self.workdir).await.unwrap_or_default()
            }
            _ => String::new(),
        }
    }

    fn render_commit_message(&self, task: &str, files: &[String]) -> String {
        let message = match &self.commit_message {
            Some(f) => f(task, files),
            None => task.lines().next().unwrap_or("").trim().to_string(),
        };
        if message.is_empty() {
            "apply requested changes".to_string()
        } else {
            message
        }
    }

    async fn rollback(&self, result: &mut OrchestratorResult) {
        let Some(git) = &self.git else { return };
        let Some(stash) = result.stash_ref.clone() else { return };
        if !self.approve("rollback", &stash) {
            return;
        }
        if let Some(original) = result.original_branch.clone() {
            if let Err(e) = git.exec(&["checkout", &original], &self.workdir).await {
                warn!(error = %e, "rollback checkout failed");
            }
        }
        if let Err(e) = git.exec(&["stash", "apply", &stash], &self.workdir).await {
            warn!(error = %e, "rollback stash apply failed");
        } else {
            debug!(stash = %stash, "rolled back working tree");
        }
    }

    fn finalize(&self, result: &mut OrchestratorResult, started: Instant) {
        dedup_files(&mut result.modified_files);
        dedup_files(&mut result.created_files);
        let mut stats = AggregateStats::default();
        for outcome in &result.coding_results {
            stats.absorb(outcome);
        }
        result.stats = stats;
        result.elapsed_ms = (started.elapsed().as_millis() as u64).max(1);
        self.progress(Phase::Done, None, None, result.summary.clone(), started);
        if let Some(recorder) = &self.on_record {
            // Best-effort flush: a broken recorder must not lose the result.
            if std::panic::catch_unwind(AssertUnwindSafe(|| recorder(result))).is_err() {
                warn!("session recorder panicked; result not recorded");
            }
        }
    }

    fn progress(
        &self,
        phase: Phase,
        step: Option<u32>,
        total_steps: Option<u32>,
        message: impl Into<String>,
        started: Instant,
    ) {
        if let Some(sink) = &self.on_progress {
            sink(ProgressEvent {
                phase,
                step,
                total_steps,
                message: message.into(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
    }

    /// Destructive actions default to proceed when no approver is installed,
    /// and also when the approver panics.
    fn approve(&self, action: &str, detail: &str) -> bool {
        match &self.on_approval {
            None => true,
            Some(cb) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| cb(action, detail))).unwrap_or(true)
            }
        }
    }

    fn mark(&self, result: &mut OrchestratorResult, phase: Phase, t: Instant) {
        result
            .phase_timings_ms
            .insert(phase.to_string(), t.elapsed().as_millis() as u64);
    }
}

fn clamp_report(report: &mut ReviewReport) {
    report.issues.retain(|i| i.severity >= Severity::Warning);
    report.issues.truncate(MAX_REVIEW_ISSUES);
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
