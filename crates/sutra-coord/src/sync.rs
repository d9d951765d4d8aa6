// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

// ─── Barriers ─────────────────────────────────────────────────────────────────

struct BarrierState {
    required: usize,
    arrived: HashSet<String>,
    waiters: Vec<oneshot::Sender<()>>,
    complete: bool,
}

/// Named one-shot barriers: `arrive` resolves every pending arrival once the
/// required number of distinct actors has arrived.  Arrivals after
/// completion return immediately.
#[derive(Clone, Default)]
pub struct BarrierSet {
    state: Arc<Mutex<HashMap<String, BarrierState>>>,
}

impl BarrierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn arrive(&self, name: &str, actor: &str, required: usize) {
        let rx = {
            let mut state = self.state.lock().unwrap();
            let barrier = state.entry(name.to_string()).or_insert_with(|| BarrierState {
                required: required.max(1),
                arrived: HashSet::new(),
                waiters: Vec::new(),
                complete: false,
            });
            if barrier.complete {
                return;
            }
            barrier.arrived.insert(actor.to_string());
            if barrier.arrived.len() >= barrier.required {
                barrier.complete = true;
                for tx in barrier.waiters.drain(..) {
                    let _ = tx.send(());
                }
                return;
            }
            let (tx, rx) = oneshot::channel();
            barrier.waiters.push(tx);
            rx
        };
        // A dropped sender can only mean the set itself was dropped; treat
        // it as released rather than panicking.
        let _ = rx.await;
    }

    pub fn is_complete(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .get(name)
            .map(|b| b.complete)
            .unwrap_or(false)
    }
}

// ─── Semaphores ───────────────────────────────────────────────────────────────

struct SemState {
    max: usize,
    out: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Named counting semaphores with FIFO hand-off.
#[derive(Clone, Default)]
pub struct SemaphoreSet {
    state: Arc<Mutex<HashMap<String, SemState>>>,
}

impl SemaphoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one permit from `name`, creating the semaphore with
    /// `max_permits` on first use.  Waits FIFO behind earlier acquirers.
    pub async fn acquire(&self, name: &str, max_permits: usize) {
        let rx = {
            let mut state = self.state.lock().unwrap();
            let sem = state.entry(name.to_string()).or_insert_with(|| SemState {
                max: max_permits.max(1),
                out: 0,
                waiters: VecDeque::new(),
            });
            if sem.out < sem.max {
                sem.out += 1;
                return;
            }
            let (tx, rx) = oneshot::channel();
            sem.waiters.push_back(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Return one permit; the oldest waiter (if any) takes it over.
    pub fn release(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(sem) = state.get_mut(name) else {
            return;
        };
        while let Some(tx) = sem.waiters.pop_front() {
            if tx.send(()).is_ok() {
                // Permit handed over; `out` stays the same.
                return;
            }
        }
        sem.out = sem.out.saturating_sub(1);
    }

    pub fn available(&self, name: &str) -> Option<usize> {
        self.state
            .lock()
            .unwrap()
            .get(name)
            .map(|s| s.max.saturating_sub(s.out))
    }
}

// ─── Result collector ─────────────────────────────────────────────────────────

/// Outcome of a collection round.  Failures don't abort the round; they are
/// recorded per-submitter under `errors`.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub results: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
}

struct Collection {
    expected: usize,
    gathered: Collected,
    waiter: Option<oneshot::Sender<Collected>>,
}

/// Fan-in of N expected results under one id.
#[derive(Clone, Default)]
pub struct ResultCollector {
    state: Arc<Mutex<HashMap<String, Collection>>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection expecting `expected` submissions and wait for
    /// them all.  Submissions to an unregistered id are rejected, so call
    /// this before fanning work out.
    pub async fn collect(&self, id: &str, expected: usize) -> Collected {
        if expected == 0 {
            return Collected::default();
        }
        let rx = {
            let (tx, rx) = oneshot::channel();
            let mut state = self.state.lock().unwrap();
            state.insert(
                id.to_string(),
                Collection {
                    expected,
                    gathered: Collected::default(),
                    waiter: Some(tx),
                },
            );
            rx
        };
        rx.await.unwrap_or_default()
    }

    /// Record one submission.  Returns `false` for unknown collection ids.
    pub fn submit(&self, id: &str, from: &str, value: Result<Value, String>) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(collection) = state.get_mut(id) else {
            return false;
        };
        match value {
            Ok(v) => {
                collection.gathered.results.insert(from.to_string(), v);
            }
            Err(e) => {
                collection.gathered.errors.insert(from.to_string(), e);
            }
        }
        let received = collection.gathered.results.len() + collection.gathered.errors.len();
        if received >= collection.expected {
            if let Some(done) = state.remove(id) {
                if let Some(tx) = done.waiter {
                    let _ = tx.send(done.gathered);
                }
            }
        }
        true
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    // ── Barrier ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn barrier_releases_when_required_arrive() {
        let barriers = BarrierSet::new();
        let b2 = barriers.clone();
        let early = tokio::spawn(async move { b2.arrive("sync", "a", 2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!early.is_finished(), "first arrival must wait");
        barriers.arrive("sync", "b", 2).await;
        tokio::time::timeout(Duration::from_millis(200), early)
            .await
            .expect("barrier released")
            .unwrap();
        assert!(barriers.is_complete("sync"));
    }

    #[tokio::test]
    async fn barrier_ignores_arrivals_after_completion() {
        let barriers = BarrierSet::new();
        barriers.arrive("b", "a", 1).await;
        // Completed with one arrival; later arrivals return immediately.
        tokio::time::timeout(Duration::from_millis(100), barriers.arrive("b", "z", 1))
            .await
            .expect("post-completion arrival must not block");
    }

    #[tokio::test]
    async fn barrier_counts_distinct_actors_only() {
        let barriers = BarrierSet::new();
        let b2 = barriers.clone();
        let first = tokio::spawn(async move { b2.arrive("d", "a", 2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let b3 = barriers.clone();
        let repeat = tokio::spawn(async move { b3.arrive("d", "a", 2).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!first.is_finished());
        assert!(!repeat.is_finished(), "same actor does not count twice");
        barriers.arrive("d", "b", 2).await;
        tokio::time::timeout(Duration::from_millis(200), async {
            first.await.unwrap();
            repeat.await.unwrap();
        })
        .await
        .expect("all arrivals released");
    }

    // ── Semaphore ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn semaphore_grants_up_to_max() {
        let sems = SemaphoreSet::new();
        sems.acquire("s", 2).await;
        sems.acquire("s", 2).await;
        assert_eq!(sems.available("s"), Some(0));
    }

    #[tokio::test]
    async fn semaphore_blocks_past_max_until_release() {
        let sems = SemaphoreSet::new();
        sems.acquire("s", 1).await;
        let s2 = sems.clone();
        let blocked = tokio::spawn(async move { s2.acquire("s", 1).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());
        sems.release("s");
        tokio::time::timeout(Duration::from_millis(200), blocked)
            .await
            .expect("handed permit")
            .unwrap();
    }

    #[tokio::test]
    async fn semaphore_fifo_order() {
        let sems = SemaphoreSet::new();
        sems.acquire("s", 1).await;
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second"] {
            let sems2 = sems.clone();
            let order2 = order.clone();
            tokio::spawn(async move {
                sems2.acquire("s", 1).await;
                order2.lock().unwrap().push(name);
            });
            // Ensure queueing order matches spawn order.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sems.release("s");
        tokio::time::sleep(Duration::from_millis(30)).await;
        sems.release("s");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn release_without_waiters_restores_permit() {
        let sems = SemaphoreSet::new();
        sems.acquire("s", 1).await;
        sems.release("s");
        assert_eq!(sems.available("s"), Some(1));
    }

    // ── Result collector ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn collect_gathers_mixed_results_and_errors() {
        let collector = ResultCollector::new();
        let c2 = collector.clone();
        let round = tokio::spawn(async move { c2.collect("round-1", 3).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(collector.submit("round-1", "w1", Ok(json!(1))));
        assert!(collector.submit("round-1", "w2", Err("exploded".into())));
        assert!(collector.submit("round-1", "w3", Ok(json!(3))));

        let collected = round.await.unwrap();
        assert_eq!(collected.results.len(), 2);
        assert_eq!(collected.errors.get("w2").unwrap(), "exploded");
    }

    #[tokio::test]
    async fn submit_unknown_id_is_rejected() {
        let collector = ResultCollector::new();
        assert!(!collector.submit("nope", "w", Ok(json!(null))));
    }

    #[tokio::test]
    async fn collect_zero_expected_returns_immediately() {
        let collector = ResultCollector::new();
        let collected = collector.collect("empty", 0).await;
        assert!(collected.results.is_empty());
    }
}
