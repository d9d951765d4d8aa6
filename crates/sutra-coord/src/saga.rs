// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;
use tracing::{debug, warn};

use sutra_mesh::ActorSystem;

/// One saga step: an `ask` to a worker actor plus the compensating payload
/// sent if a later step fails.
#[derive(Debug, Clone)]
pub struct SagaStep {
    pub name: String,
    pub actor: String,
    pub payload: Value,
    /// Sent via `tell` during rollback; `None` marks the step as
    /// non-compensatable.
    pub compensation: Option<Value>,
    pub timeout_ms: Option<u64>,
}

/// What happened to a saga run.
#[derive(Debug, Clone, Default)]
pub struct SagaReport {
    pub completed: Vec<String>,
    pub failed_step: Option<String>,
    /// Steps whose compensation was dispatched, in rollback order.
    pub compensated: Vec<String>,
}

impl SagaReport {
    pub fn succeeded(&self) -> bool {
        self.failed_step.is_none()
    }
}

/// A step reply carrying `{"error": ...}` counts as a step failure.
fn reply_is_error(payload: &Value) -> bool {
    payload.get("error").is_some()
}

/// Run steps in order; on the first failure, dispatch compensations for the
/// completed steps in reverse.  Compensations use `tell` and never block the
/// rollback on their own failure.
pub async fn run_saga(system: &ActorSystem, initiator: &str, steps: &[SagaStep]) -> SagaReport {
    let mut report = SagaReport::default();
    let mut done: Vec<&SagaStep> = Vec::new();

    for step in steps {
        let outcome = system
            .ask(initiator, &step.actor, step.payload.clone(), step.timeout_ms)
            .await;
        let failed = match &outcome {
            Ok(reply) => reply_is_error(&reply.payload),
            Err(e) => {
                debug!(step = %step.name, error = %e, "saga step ask failed");
                true
            }
        };
        if failed {
            report.failed_step = Some(step.name.clone());
            for prior in done.iter().rev() {
                match &prior.compensation {
                    Some(payload) => {
                        system.tell(initiator, prior.actor.clone(), payload.clone(), None);
                        report.compensated.push(prior.name.clone());
                    }
                    None => warn!(step = %prior.name, "saga step has no compensation"),
                }
            }
            return report;
        }
        report.completed.push(step.name.clone());
        done.push(step);
    }
    report
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use sutra_config::MeshConfig;
    use sutra_mesh::{behavior, SpawnOptions};

    fn step(name: &str, actor: &str, ok: bool) -> SagaStep {
        SagaStep {
            name: name.into(),
            actor: actor.into(),
            payload: json!({"ok": ok}),
            compensation: Some(json!({"undo": name})),
            timeout_ms: Some(1_000),
        }
    }

    /// Worker that succeeds or fails based on the `ok` flag in the payload,
    /// and records compensation payloads it receives.
    fn worker(log: Arc<Mutex<Vec<String>>>) -> sutra_mesh::Behavior {
        behavior(move |envelope, ctx| {
            let log = log.clone();
            async move {
                if let Some(undo) = envelope.payload.get("undo") {
                    log.lock()
                        .unwrap()
                        .push(format!("undo:{}", undo.as_str().unwrap_or("?")));
                    return Ok(());
                }
                if envelope.payload.get("ok") == Some(&json!(true)) {
                    ctx.reply(json!({"done": true}));
                } else {
                    ctx.reply(json!({"error": "step refused"}));
                }
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn saga_completes_all_steps_on_success() {
        let sys = ActorSystem::new(MeshConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        sys.spawn("w", worker(log.clone()), SpawnOptions::default()).unwrap();
        let steps = vec![step("s1", "w", true), step("s2", "w", true)];
        let report = run_saga(&sys, "saga", &steps).await;
        assert!(report.succeeded());
        assert_eq!(report.completed, vec!["s1", "s2"]);
        assert!(report.compensated.is_empty());
    }

    #[tokio::test]
    async fn saga_compensates_in_reverse_order() {
        let sys = ActorSystem::new(MeshConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        sys.spawn("w", worker(log.clone()), SpawnOptions::default()).unwrap();
        let steps = vec![
            step("s1", "w", true),
            step("s2", "w", true),
            step("s3", "w", false),
        ];
        let report = run_saga(&sys, "saga", &steps).await;
        assert_eq!(report.failed_step.as_deref(), Some("s3"));
        assert_eq!(report.compensated, vec!["s2", "s1"], "reverse order");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = log.lock().unwrap().clone();
        assert_eq!(got, vec!["undo:s2", "undo:s1"]);
    }

    #[tokio::test]
    async fn saga_fails_on_unknown_actor_without_panicking() {
        let sys = ActorSystem::new(MeshConfig::default());
        let steps = vec![step("s1", "ghost", true)];
        let report = run_saga(&sys, "saga", &steps).await;
        assert_eq!(report.failed_step.as_deref(), Some("s1"));
        assert!(report.completed.is_empty());
    }

    #[tokio::test]
    async fn missing_compensation_is_skipped() {
        let sys = ActorSystem::new(MeshConfig::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        sys.spawn("w", worker(log.clone()), SpawnOptions::default()).unwrap();
        let mut first = step("s1", "w", true);
        first.compensation = None;
        let steps = vec![first, step("s2", "w", false)];
        let report = run_saga(&sys, "saga", &steps).await;
        assert_eq!(report.failed_step.as_deref(), Some("s2"));
        assert!(report.compensated.is_empty());
    }
}
