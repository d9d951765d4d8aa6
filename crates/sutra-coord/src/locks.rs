// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::CoordError;

struct Waiter {
    actor: String,
    tx: oneshot::Sender<Result<(), CoordError>>,
}

struct LockEntry {
    holder: String,
    acquired_at_ms: i64,
    expires_at_ms: Option<i64>,
    waiters: VecDeque<Waiter>,
}

/// Read-only view of one lock for diagnostics and deadlock detection.
#[derive(Debug, Clone)]
pub struct LockSnapshot {
    pub resource: String,
    pub holder: String,
    pub acquired_at_ms: i64,
    pub waiters: Vec<String>,
}

/// Exclusive resource locks with FIFO wait queues and lease expiry.
///
/// Cloneable handle; all clones share the same lock table.
#[derive(Clone)]
pub struct LockManager {
    state: Arc<Mutex<HashMap<String, LockEntry>>>,
    /// Lease applied to every acquisition; expired locks are reclaimed by
    /// [`LockManager::sweep_expired`].
    lease_ms: Option<u64>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            lease_ms: None,
        }
    }

    pub fn with_lease(lease_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            lease_ms: Some(lease_ms),
        }
    }

    /// Acquire `resource` for `holder`, waiting up to `timeout_ms` behind the
    /// current holder.  Re-acquiring a lock the holder already owns succeeds
    /// immediately.  An actor cannot join the same wait queue twice.
    pub async fn acquire_lock(
        &self,
        resource: &str,
        holder: &str,
        timeout_ms: u64,
    ) -> Result<(), CoordError> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            let now = Utc::now().timestamp_millis();
            match state.get_mut(resource) {
                None => {
                    state.insert(resource.to_string(), self.fresh_entry(holder, now));
                    debug!(resource, holder, "lock acquired");
                    return Ok(());
                }
                Some(entry) => {
                    if entry.holder == holder {
                        return Ok(());
                    }
                    if entry.waiters.iter().any(|w| w.actor == holder) {
                        return Err(CoordError::AlreadyWaiting {
                            resource: resource.to_string(),
                            actor: holder.to_string(),
                        });
                    }
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push_back(Waiter {
                        actor: holder.to_string(),
                        tx,
                    });
                    rx
                }
            }
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => result,
            // The entry (and our waiter) vanished, e.g. swept away.
            Ok(Err(_)) => Err(CoordError::LockTimeout {
                resource: resource.to_string(),
            }),
            Err(_) => {
                self.remove_waiter(resource, holder);
                Err(CoordError::LockTimeout {
                    resource: resource.to_string(),
                })
            }
        }
    }

    fn fresh_entry(&self, holder: &str, now: i64) -> LockEntry {
        LockEntry {
            holder: holder.to_string(),
            acquired_at_ms: now,
            expires_at_ms: self.lease_ms.map(|l| now + l as i64),
            waiters: VecDeque::new(),
        }
    }

    fn remove_waiter(&self, resource: &str, actor: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.get_mut(resource) {
            entry.waiters.retain(|w| w.actor != actor);
        }
    }

    /// Release a lock the holder owns; the next waiter (FIFO) is promoted.
    /// Returns `false` when `holder` does not own the lock.
    pub fn release_lock(&self, resource: &str, holder: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.get_mut(resource) else {
            return false;
        };
        if entry.holder != holder {
            return false;
        }
        Self::promote_or_remove(&mut state, resource, self.lease_ms);
        true
    }

    fn promote_or_remove(
        state: &mut HashMap<String, LockEntry>,
        resource: &str,
        lease_ms: Option<u64>,
    ) {
        let remove = {
            let Some(entry) = state.get_mut(resource) else {
                return;
            };
            loop {
                match entry.waiters.pop_front() {
                    Some(next) => {
                        let now = Utc::now().timestamp_millis();
                        entry.holder = next.actor.clone();
                        entry.acquired_at_ms = now;
                        entry.expires_at_ms = lease_ms.map(|l| now + l as i64);
                        if next.tx.send(Ok(())).is_ok() {
                            debug!(resource, holder = %entry.holder, "lock promoted to waiter");
                            break false;
                        }
                        // Waiter gave up (timeout) between queueing and now;
                        // try the next one.
                    }
                    None => break true,
                }
            }
        };
        if remove {
            state.remove(resource);
        }
    }

    /// Reclaim locks whose lease has expired; waiting actors are promoted.
    /// Returns the resources that changed hands or were freed.
    pub fn sweep_expired(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = state
            .iter()
            .filter(|(_, e)| e.expires_at_ms.map(|x| x <= now).unwrap_or(false))
            .map(|(r, _)| r.clone())
            .collect();
        for resource in &expired {
            debug!(resource, "lock lease expired, reclaiming");
            Self::promote_or_remove(&mut state, resource, self.lease_ms);
        }
        expired
    }

    /// Force-release every lock `victim` holds and reject its queued waits.
    /// Used by deadlock resolution.
    pub fn force_release_all(&self, victim: &str) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        // Reject the victim's pending waits first so it cannot be promoted
        // into a lock we are about to free.
        for entry in state.values_mut() {
            let mut kept = VecDeque::new();
            while let Some(w) = entry.waiters.pop_front() {
                if w.actor == victim {
                    let _ = w.tx.send(Err(CoordError::AbortedForDeadlock {
                        actor: victim.to_string(),
                    }));
                } else {
                    kept.push_back(w);
                }
            }
            entry.waiters = kept;
        }
        let held: Vec<String> = state
            .iter()
            .filter(|(_, e)| e.holder == victim)
            .map(|(r, _)| r.clone())
            .collect();
        for resource in &held {
            Self::promote_or_remove(&mut state, resource, self.lease_ms);
        }
        held
    }

    /// Snapshot of every lock with a view of its wait queue.
    pub fn snapshot(&self) -> Vec<LockSnapshot> {
        let state = self.state.lock().unwrap();
        state
            .iter()
            .map(|(resource, e)| LockSnapshot {
                resource: resource.clone(),
                holder: e.holder.clone(),
                acquired_at_ms: e.acquired_at_ms,
                waiters: e.waiters.iter().map(|w| w.actor.clone()).collect(),
            })
            .collect()
    }

    pub fn holder_of(&self, resource: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .get(resource)
            .map(|e| e.holder.clone())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
