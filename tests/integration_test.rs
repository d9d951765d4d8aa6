// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end scenarios across the orchestrator, classifier, banker, and
//! deadlock detector, driven entirely by mock collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sutra_classify::{classify, Intent, Route};
use sutra_config::{OrchestratorConfig, PipelineMode};
use sutra_coord::{
    detect_deadlocks, resolve_deadlock, Banker, LockManager, ResolutionStrategy,
};
use sutra_pipeline::{
    Coder, CommandOutput, CommandRunner, Complexity, GitRunner, Orchestrator, Phase, Plan,
    PlanStep, Planner, StepOutcome,
};

// ─── Mock collaborators ───────────────────────────────────────────────────────

struct FixedPlanner {
    steps: usize,
}

#[async_trait]
impl Planner for FixedPlanner {
    async fn plan(&self, _task: &str, _context: Option<&str>) -> anyhow::Result<Plan> {
        Ok(Plan {
            steps: (0..self.steps)
                .map(|i| PlanStep {
                    description: format!("step {}", i + 1),
                    files: vec![],
                })
                .collect(),
            relevant_files: vec!["src/auth.rs".into()],
            complexity: Complexity::Medium,
            requires_new_files: false,
            test_suggestion: None,
            dependency_hints: vec![],
        })
    }
}

#[derive(Default)]
struct RecordingCoder {
    calls: AtomicU32,
}

#[async_trait]
impl Coder for RecordingCoder {
    async fn execute_step(
        &self,
        step: &PlanStep,
        _plan: &Plan,
        _task: &str,
    ) -> anyhow::Result<StepOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutcome {
            summary: format!("completed {}", step.description),
            modified_files: vec!["src/auth.rs".into()],
            cost: 0.2,
            input_tokens: 500,
            output_tokens: 200,
            turns: 2,
            success: true,
            ..Default::default()
        })
    }
}

struct FixingDebugger;

#[async_trait]
impl sutra_pipeline::Debugger for FixingDebugger {
    async fn fix(&self, _failure_log: &str) -> anyhow::Result<StepOutcome> {
        Ok(StepOutcome {
            summary: "patched failing test".into(),
            modified_files: vec!["src/auth.rs".into()],
            turns: 1,
            success: true,
            ..Default::default()
        })
    }
}

/// Passes validation after `failures` failing rounds (one command per round).
struct ScriptedCommands {
    failures: u32,
    runs: AtomicU32,
}

impl ScriptedCommands {
    fn failing_forever() -> Self {
        Self {
            failures: u32::MAX,
            runs: AtomicU32::new(0),
        }
    }
    fn passing() -> Self {
        Self {
            failures: 0,
            runs: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommands {
    async fn run(&self, _command: &str) -> anyhow::Result<CommandOutput> {
        let round = self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(CommandOutput {
            success: round >= self.failures,
            output: "assertion failed: expected Ok, got Err".into(),
        })
    }
}

struct FakeGit {
    log: Mutex<Vec<String>>,
}

impl FakeGit {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
        }
    }
    fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitRunner for FakeGit {
    async fn exec(&self, args: &[&str], _cwd: &Path) -> anyhow::Result<String> {
        self.log.lock().unwrap().push(args.join(" "));
        Ok(match args {
            ["rev-parse", "--abbrev-ref", "HEAD"] => "main\n".into(),
            ["rev-parse", "HEAD"] => "4f9c2d7e\n".into(),
            ["stash", "create"] => String::new(),
            _ => String::new(),
        })
    }
    async fn detect_repo(&self, _cwd: &Path) -> bool {
        true
    }
    async fn diff(&self, _cwd: &Path) -> anyhow::Result<String> {
        Ok("diff --git a/src/auth.rs b/src/auth.rs\n--- a/src/auth.rs\n+++ b/src/auth.rs\n+fn validate() {}\n".into())
    }
}

fn test_config(mode: PipelineMode) -> OrchestratorConfig {
    OrchestratorConfig {
        mode,
        test_command: Some("run tests".into()),
        ..Default::default()
    }
}

// ─── S1: plan-only mode ───────────────────────────────────────────────────────

#[tokio::test]
async fn plan_only_mode_produces_plan_without_side_effects() {
    let git = Arc::new(FakeGit::new());
    let orch = Orchestrator::new(
        test_config(PipelineMode::PlanOnly),
        "/tmp",
        Arc::new(FixedPlanner { steps: 3 }),
        Arc::new(RecordingCoder::default()),
    )
    .with_git(git.clone());

    let result = orch.run("Explain the auth module").await;

    assert!(result.success);
    assert_eq!(result.plan.as_ref().unwrap().steps.len(), 3);
    assert!(result.summary.starts_with("Plan:"));
    assert!(result.errors.is_empty());
    assert_eq!(result.phase_timings_ms.len(), 1);
    assert!(result.phase_timings_ms.contains_key("planning"));
    assert!(git.commands().is_empty(), "no git state changes in plan-only");
}

// ─── S2: full-mode happy path ─────────────────────────────────────────────────

#[tokio::test]
async fn full_mode_happy_path_branches_validates_and_commits() {
    let git = Arc::new(FakeGit::new());
    let coder = Arc::new(RecordingCoder::default());
    let orch = Orchestrator::new(
        test_config(PipelineMode::Full),
        "/tmp",
        Arc::new(FixedPlanner { steps: 2 }),
        coder.clone(),
    )
    .with_git(git.clone())
    .with_debugger(Arc::new(FixingDebugger))
    .with_command_runner(Arc::new(ScriptedCommands::passing()));

    let result = orch.run("Add input validation").await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.feature_branch.as_deref(),
        Some("feat/add-input-validation")
    );
    assert_eq!(result.commits.len(), 1);
    assert_eq!(result.validation_passed, Some(true));
    assert!(result.review_issues.is_empty());
    assert!(result.diff_stats.unwrap().files_changed >= 1);
    assert!(result.elapsed_ms > 0);
    assert!(result.errors.is_empty());
    assert_eq!(coder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.stats.turns, 4, "2 steps × 2 turns each");
}

// ─── S3: validation retry then give up ────────────────────────────────────────

#[tokio::test]
async fn validation_failure_gives_up_after_debug_cycles() {
    let git = Arc::new(FakeGit::new());
    let orch = Orchestrator::new(
        test_config(PipelineMode::Full),
        "/tmp",
        Arc::new(FixedPlanner { steps: 1 }),
        Arc::new(RecordingCoder::default()),
    )
    .with_git(git.clone())
    .with_debugger(Arc::new(FixingDebugger))
    .with_command_runner(Arc::new(ScriptedCommands::failing_forever()));

    let result = orch.run("fix the flaky auth test").await;

    assert!(!result.success);
    assert_eq!(result.validation_passed, Some(false));
    assert!(result.errors.iter().any(|e| e.phase == Phase::Validating));
    assert!(
        result.coding_results.len() >= 4,
        "one coder step plus three debug attempts, got {}",
        result.coding_results.len()
    );
    assert!(result.commits.is_empty());
    assert!(
        !git.commands().iter().any(|c| c.starts_with("commit")),
        "commit must never be attempted after failed validation"
    );
}

// ─── S4: classifier routes search to tool-only ────────────────────────────────

#[test]
fn search_query_routes_to_tool_only() {
    let c = classify("find all .ts files in src/");
    assert_eq!(c.intent, Intent::Search);
    assert!(c.features.has_file_paths);
    assert!(c.confidence >= 0.8, "confidence {}", c.confidence);
    assert_eq!(c.route, Route::ToolOnly);
    assert!(c.ambiguity <= 0.3, "ambiguity {}", c.ambiguity);
}

// ─── S5: banker denies unsafe grants ──────────────────────────────────────────

#[test]
fn banker_grants_only_safe_states() {
    let req = |n: u64| HashMap::from([("cpu".to_string(), n)]);

    // Two agents sharing cpu=3, each declaring max 2: every grant the
    // safety check accepts must leave the system safe.
    let mut b = Banker::new();
    b.add_resource("cpu", 3);
    b.declare_maximum("a", &req(2));
    b.declare_maximum("b", &req(2));
    b.request_resource("a", &req(1)).unwrap();
    assert!(b.is_safe_state());
    b.request_resource("b", &req(1)).unwrap();
    assert!(b.is_safe_state());
    match b.request_resource("b", &req(1)) {
        Ok(()) => assert!(b.is_safe_state(), "a committed grant implies safety"),
        Err(denial) => {
            let msg = denial.to_string();
            assert!(msg.contains("unsafe") || msg.contains("Insufficient"), "{msg}");
        }
    }

    // A configuration where the second unit genuinely cannot be granted.
    let mut b = Banker::new();
    b.add_resource("cpu", 3);
    b.declare_maximum("a", &req(2));
    b.declare_maximum("b", &req(3));
    b.request_resource("a", &req(1)).unwrap();
    b.request_resource("b", &req(1)).unwrap();
    let denial = b.request_resource("b", &req(1)).unwrap_err();
    let msg = denial.to_string();
    assert!(msg.contains("unsafe") || msg.contains("Insufficient"), "{msg}");
    assert!(b.is_safe_state(), "denied grant must be rolled back");
}

// ─── S6: deadlock detection and resolution ────────────────────────────────────

#[tokio::test]
async fn two_party_deadlock_is_detected_and_resolved() {
    let locks = LockManager::new();
    locks.acquire_lock("r1", "agent-a", 1_000).await.unwrap();
    locks.acquire_lock("r2", "agent-b", 1_000).await.unwrap();

    let locks_a = locks.clone();
    let wait_a = tokio::spawn(async move { locks_a.acquire_lock("r2", "agent-a", 5_000).await });
    let locks_b = locks.clone();
    let wait_b = tokio::spawn(async move { locks_b.acquire_lock("r1", "agent-b", 5_000).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cycles = detect_deadlocks(&locks);
    assert!(!cycles.is_empty(), "cycle must be detected");
    let cycle = &cycles[0];
    assert!(cycle.cycle.contains(&"agent-a".to_string()));
    assert!(cycle.cycle.contains(&"agent-b".to_string()));
    assert!(cycle.resources.contains(&"r1".to_string()));
    assert!(cycle.resources.contains(&"r2".to_string()));

    let victim = resolve_deadlock(&locks, cycle, ResolutionStrategy::Youngest)
        .expect("a victim is chosen");
    assert!(cycle.cycle.contains(&victim));

    // The survivor's pending acquire resolves; the victim's rejects.
    let (a, b) = tokio::join!(wait_a, wait_b);
    let (a, b) = (a.unwrap(), b.unwrap());
    if victim == "agent-a" {
        assert!(a.is_err());
        assert!(b.is_ok(), "survivor must obtain the lock");
    } else {
        assert!(b.is_err());
        assert!(a.is_ok(), "survivor must obtain the lock");
    }
    assert!(detect_deadlocks(&locks).is_empty());
}
