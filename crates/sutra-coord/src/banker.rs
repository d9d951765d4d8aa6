// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a resource request was denied.  Denials are structured outcomes, not
/// failures of the allocator itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BankerDenial {
    #[error("agent has not declared a maximum for {0}")]
    NotDeclared(String),
    #[error("request exceeded declared maximum for {0}")]
    ExceededMaximum(String),
    #[error("Insufficient {0} available")]
    Insufficient(String),
    #[error("grant would leave the system unsafe")]
    Unsafe,
    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

/// Full allocator snapshot for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankerSnapshot {
    pub totals: HashMap<String, u64>,
    pub available: HashMap<String, u64>,
    pub maximums: HashMap<String, HashMap<String, u64>>,
    pub allocations: HashMap<String, HashMap<String, u64>>,
}

/// Deadlock-avoiding resource allocator (Banker's algorithm).
///
/// A request is granted only when, after the tentative grant, some ordering
/// of agents can still run to completion within the declared maxima.
#[derive(Default)]
pub struct Banker {
    totals: HashMap<String, u64>,
    maximums: HashMap<String, HashMap<String, u64>>,
    allocations: HashMap<String, HashMap<String, u64>>,
}

impl Banker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or extend) a managed resource pool.
    pub fn add_resource(&mut self, name: impl Into<String>, total: u64) {
        *self.totals.entry(name.into()).or_insert(0) += total;
    }

    /// Declare an agent's worst-case demand.  Must precede any request.
    /// Declarations are capped at the pool total.
    pub fn declare_maximum(&mut self, agent: impl Into<String>, maxima: &HashMap<String, u64>) {
        let entry = self.maximums.entry(agent.into()).or_default();
        for (res, n) in maxima {
            let cap = self.totals.get(res).copied().unwrap_or(0);
            entry.insert(res.clone(), (*n).min(cap));
        }
    }

    pub fn available(&self, resource: &str) -> u64 {
        let total = self.totals.get(resource).copied().unwrap_or(0);
        let allocated: u64 = self
            .allocations
            .values()
            .filter_map(|a| a.get(resource))
            .sum();
        total.saturating_sub(allocated)
    }

    fn allocation_of(&self, agent: &str, resource: &str) -> u64 {
        self.allocations
            .get(agent)
            .and_then(|a| a.get(resource))
            .copied()
            .unwrap_or(0)
    }

    fn need_of(&self, agent: &str, resource: &str) -> u64 {
        let max = self
            .maximums
            .get(agent)
            .and_then(|m| m.get(resource))
            .copied()
            .unwrap_or(0);
        max.saturating_sub(self.allocation_of(agent, resource))
    }

    /// Request resources.  Grants commit only if the resulting state is safe;
    /// otherwise the tentative grant is rolled back and the denial explains
    /// which check failed.
    pub fn request_resource(
        &mut self,
        agent: &str,
        request: &HashMap<String, u64>,
    ) -> Result<(), BankerDenial> {
        for (res, n) in request {
            if !self.totals.contains_key(res) {
                return Err(BankerDenial::UnknownResource(res.clone()));
            }
            if !self
                .maximums
                .get(agent)
                .map(|m| m.contains_key(res))
                .unwrap_or(false)
            {
                return Err(BankerDenial::NotDeclared(res.clone()));
            }
            if *n > self.need_of(agent, res) {
                return Err(BankerDenial::ExceededMaximum(res.clone()));
            }
            if *n > self.available(res) {
                return Err(BankerDenial::Insufficient(res.clone()));
            }
        }

        // Tentative grant.
        for (res, n) in request {
            *self
                .allocations
                .entry(agent.to_string())
                .or_default()
                .entry(res.clone())
                .or_insert(0) += n;
        }

        if self.is_safe_state() {
            debug!(agent, ?request, "resource grant committed");
            Ok(())
        } else {
            // Roll back.
            for (res, n) in request {
                if let Some(alloc) = self.allocations.get_mut(agent) {
                    if let Some(v) = alloc.get_mut(res) {
                        *v = v.saturating_sub(*n);
                    }
                }
            }
            debug!(agent, ?request, "grant rolled back as unsafe");
            Err(BankerDenial::Unsafe)
        }
    }

    /// Return resources, bounded by the current allocation.  Releasing an
    /// undeclared or unallocated resource is a no-op.
    pub fn release_resource(&mut self, agent: &str, release: &HashMap<String, u64>) {
        let Some(alloc) = self.allocations.get_mut(agent) else {
            return;
        };
        for (res, n) in release {
            if let Some(v) = alloc.get_mut(res) {
                *v = v.saturating_sub(*n);
            }
        }
        alloc.retain(|_, v| *v > 0);
    }

    /// Drop an agent entirely: all allocations return to the pool and its
    /// declarations are forgotten.
    pub fn remove_process(&mut self, agent: &str) {
        self.allocations.remove(agent);
        self.maximums.remove(agent);
    }

    /// Banker's safety check: can every declared agent finish in some order?
    pub fn is_safe_state(&self) -> bool {
        let mut work: HashMap<&str, u64> = self
            .totals
            .keys()
            .map(|r| (r.as_str(), self.available(r)))
            .collect();
        let agents: Vec<&String> = self.maximums.keys().collect();
        let mut finished: Vec<bool> = vec![false; agents.len()];

        loop {
            let mut progressed = false;
            for (i, agent) in agents.iter().enumerate() {
                if finished[i] {
                    continue;
                }
                let can_finish = self
                    .maximums
                    .get(*agent)
                    .map(|maxima| {
                        maxima.keys().all(|res| {
                            self.need_of(agent, res) <= work.get(res.as_str()).copied().unwrap_or(0)
                        })
                    })
                    .unwrap_or(true);
                if can_finish {
                    // Simulate completion: its allocation returns to work.
                    if let Some(alloc) = self.allocations.get(*agent) {
                        for (res, n) in alloc {
                            if let Some(w) = work.get_mut(res.as_str()) {
                                *w += n;
                            }
                        }
                    }
                    finished[i] = true;
                    progressed = true;
                }
            }
            if finished.iter().all(|f| *f) {
                return true;
            }
            if !progressed {
                return false;
            }
        }
    }

    pub fn snapshot(&self) -> BankerSnapshot {
        BankerSnapshot {
            totals: self.totals.clone(),
            available: self
                .totals
                .keys()
                .map(|r| (r.clone(), self.available(r)))
                .collect(),
            maximums: self.maximums.clone(),
            allocations: self.allocations.clone(),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn req(pairs: &[(&str, u64)]) -> HashMap<String, u64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn two_agent_cpu3() -> Banker {
        let mut b = Banker::new();
        b.add_resource("cpu", 3);
        b.declare_maximum("a", &req(&[("cpu", 2)]));
        b.declare_maximum("b", &req(&[("cpu", 2)]));
        b
    }

    #[test]
    fn grant_within_declared_max_succeeds() {
        let mut b = two_agent_cpu3();
        b.request_resource("a", &req(&[("cpu", 1)])).unwrap();
        assert_eq!(b.available("cpu"), 2);
        assert!(b.is_safe_state());
    }

    #[test]
    fn undeclared_agent_is_denied() {
        let mut b = two_agent_cpu3();
        let err = b.request_resource("ghost", &req(&[("cpu", 1)])).unwrap_err();
        assert!(matches!(err, BankerDenial::NotDeclared(_)));
    }

    #[test]
    fn request_beyond_declared_max_is_denied() {
        let mut b = two_agent_cpu3();
        let err = b.request_resource("a", &req(&[("cpu", 3)])).unwrap_err();
        assert!(matches!(err, BankerDenial::ExceededMaximum(_)));
    }

    #[test]
    fn request_beyond_available_is_denied() {
        let mut b = Banker::new();
        b.add_resource("cpu", 2);
        b.declare_maximum("a", &req(&[("cpu", 2)]));
        b.declare_maximum("hog", &req(&[("cpu", 2)]));
        b.request_resource("hog", &req(&[("cpu", 2)])).unwrap();
        let err = b.request_resource("a", &req(&[("cpu", 1)])).unwrap_err();
        assert!(matches!(err, BankerDenial::Insufficient(_)));
    }

    #[test]
    fn grant_that_completes_an_agents_maximum_is_safe() {
        // cpu: 3; both agents may need 2.  After 1+1 grants, B asking for its
        // final unit is safe: B reaches its maximum, finishes, and returns
        // both units for A.
        let mut b = two_agent_cpu3();
        b.request_resource("a", &req(&[("cpu", 1)])).unwrap();
        b.request_resource("b", &req(&[("cpu", 1)])).unwrap();
        b.request_resource("b", &req(&[("cpu", 1)])).unwrap();
        assert!(b.is_safe_state());
        assert_eq!(b.available("cpu"), 0);
    }

    #[test]
    fn unsafe_grant_is_rolled_back() {
        // cpu: 3; A may need 2, B may need 3.  After 1+1 grants, giving B a
        // second unit leaves available = 0 while both agents still need
        // more: no agent can finish, so the grant is denied and rolled back.
        let mut b = Banker::new();
        b.add_resource("cpu", 3);
        b.declare_maximum("a", &req(&[("cpu", 2)]));
        b.declare_maximum("b", &req(&[("cpu", 3)]));
        b.request_resource("a", &req(&[("cpu", 1)])).unwrap();
        b.request_resource("b", &req(&[("cpu", 1)])).unwrap();
        let err = b.request_resource("b", &req(&[("cpu", 1)])).unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("unsafe") || msg.contains("Insufficient"),
            "denial should explain: {msg}"
        );
        // Rollback restored the pre-request state.
        assert_eq!(b.available("cpu"), 1);
        assert!(b.is_safe_state());
    }

    #[test]
    fn granted_implies_safe() {
        let mut b = Banker::new();
        b.add_resource("cpu", 4);
        b.add_resource("mem", 2);
        b.declare_maximum("a", &req(&[("cpu", 2), ("mem", 1)]));
        b.declare_maximum("b", &req(&[("cpu", 3), ("mem", 2)]));
        b.request_resource("a", &req(&[("cpu", 1)])).unwrap();
        assert!(b.is_safe_state());
        b.request_resource("b", &req(&[("cpu", 2), ("mem", 1)])).unwrap();
        assert!(b.is_safe_state());
    }

    #[test]
    fn release_is_bounded_by_allocation() {
        let mut b = two_agent_cpu3();
        b.request_resource("a", &req(&[("cpu", 2)])).unwrap();
        b.release_resource("a", &req(&[("cpu", 99)]));
        assert_eq!(b.available("cpu"), 3, "over-release clamps to allocation");
    }

    #[test]
    fn release_undeclared_resource_is_noop() {
        let mut b = two_agent_cpu3();
        b.request_resource("a", &req(&[("cpu", 1)])).unwrap();
        b.release_resource("a", &req(&[("gpu", 1)]));
        assert_eq!(b.available("cpu"), 2);
    }

    #[test]
    fn remove_process_returns_everything() {
        let mut b = two_agent_cpu3();
        b.request_resource("a", &req(&[("cpu", 2)])).unwrap();
        b.remove_process("a");
        assert_eq!(b.available("cpu"), 3);
        assert!(matches!(
            b.request_resource("a", &req(&[("cpu", 1)])),
            Err(BankerDenial::NotDeclared(_))
        ));
    }

    #[test]
    fn available_equals_total_minus_allocations() {
        let mut b = two_agent_cpu3();
        b.request_resource("a", &req(&[("cpu", 1)])).unwrap();
        b.request_resource("b", &req(&[("cpu", 1)])).unwrap();
        let snap = b.snapshot();
        assert_eq!(snap.available.get("cpu"), Some(&1));
        assert_eq!(snap.totals.get("cpu"), Some(&3));
    }

    #[test]
    fn unknown_resource_in_request_is_denied() {
        let mut b = two_agent_cpu3();
        let err = b.request_resource("a", &req(&[("gpu", 1)])).unwrap_err();
        assert!(matches!(err, BankerDenial::UnknownResource(_)));
    }

    #[test]
    fn empty_banker_is_trivially_safe() {
        assert!(Banker::new().is_safe_state());
    }
}
