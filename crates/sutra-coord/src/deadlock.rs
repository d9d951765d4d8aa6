// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Wait-for-graph deadlock detection and victim-based resolution.
//!
//! Edges run `holder(resource) → waiter(resource)` for every lock with a
//! non-empty wait queue.  Cycle enumeration is an iterative DFS over dense
//! node indices; cycles are reported once, anchored at their smallest node.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::locks::{LockManager, LockSnapshot};

/// One elementary cycle in the wait-for graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockCycle {
    /// Actors in cycle order.
    pub cycle: Vec<String>,
    /// Resources whose hold/wait edges form the cycle.
    pub resources: Vec<String>,
}

/// How to pick the victim whose locks get force-released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// The actor whose held lock was acquired most recently.
    Youngest,
    /// The first actor in the cycle list (deterministic, arbitrary).
    LowestPriority,
    /// Uniformly random choice.
    Random,
}

/// Enumerate every deadlock cycle in the current lock table.
pub fn detect_deadlocks(locks: &LockManager) -> Vec<DeadlockCycle> {
    find_cycles(&locks.snapshot())
}

fn find_cycles(snapshot: &[LockSnapshot]) -> Vec<DeadlockCycle> {
    // Dense node set over every actor that holds or waits.
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut names: Vec<&str> = Vec::new();

    fn intern_name<'a>(
        name: &'a str,
        index: &mut HashMap<&'a str, usize>,
        names: &mut Vec<&'a str>,
    ) -> usize {
        if let Some(&i) = index.get(name) {
            return i;
        }
        let i = names.len();
        names.push(name);
        index.insert(name, i);
        i
    }

    // adjacency + the resource labelling each edge
    let mut edges: Vec<Vec<(usize, &str)>> = Vec::new();
    for snap in snapshot {
        if snap.waiters.is_empty() {
            continue;
        }
        let h = intern_name(&snap.holder, &mut index, &mut names);
        while edges.len() < names.len() {
            edges.push(Vec::new());
        }
        for waiter in &snap.waiters {
            let w = intern_name(waiter, &mut index, &mut names);
            while edges.len() < names.len() {
                edges.push(Vec::new());
            }
            // Edge points from the holder to the actor waiting on it.
            edges[h].push((w, snap.resource.as_str()));
        }
    }
    let n = names.len();
    while edges.len() < n {
        edges.push(Vec::new());
    }

    let mut cycles: Vec<DeadlockCycle> = Vec::new();
    // Anchor enumeration at each start node; only visit nodes >= start so
    // each cycle is found exactly once (rooted at its smallest index).
    for start in 0..n {
        // Iterative DFS: (node, next-edge-cursor) frames with an explicit
        // path stack; recursion depth is unbounded in adversarial graphs.
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        let mut path: Vec<usize> = vec![start];
        let mut edge_path: Vec<&str> = Vec::new();
        loop {
            let Some(&mut (node, ref mut cursor)) = frames.last_mut() else {
                break;
            };
            let cur = *cursor;
            *cursor += 1;
            let edge = edges[node].get(cur).copied();
            match edge {
                Some((next, resource)) => {
                    if next == start {
                        let mut resources: Vec<String> = edge_path
                            .iter()
                            .map(|r| r.to_string())
                            .collect();
                        resources.push(resource.to_string());
                        resources.dedup();
                        cycles.push(DeadlockCycle {
                            cycle: path.iter().map(|&i| names[i].to_string()).collect(),
                            resources,
                        });
                    } else if next > start && !path.contains(&next) {
                        frames.push((next, 0));
                        path.push(next);
                        edge_path.push(resource);
                    }
                }
                None => {
                    frames.pop();
                    path.pop();
                    edge_path.pop();
                }
            }
        }
    }
    cycles
}

/// Pick a victim from `cycle` per `strategy`, force-release everything it
/// holds, and reject its queued lock waits.  Returns the victim id.
pub fn resolve_deadlock(
    locks: &LockManager,
    cycle: &DeadlockCycle,
    strategy: ResolutionStrategy,
) -> Option<String> {
    if cycle.cycle.is_empty() {
        return None;
    }
    let victim = match strategy {
        ResolutionStrategy::LowestPriority => cycle.cycle[0].clone(),
        ResolutionStrategy::Random => cycle
            .cycle
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| cycle.cycle[0].clone()),
        ResolutionStrategy::Youngest => {
            let snapshot = locks.snapshot();
            cycle
                .cycle
                .iter()
                .map(|actor| {
                    let newest = snapshot
                        .iter()
                        .filter(|s| &s.holder == actor)
                        .map(|s| s.acquired_at_ms)
                        .max()
                        .unwrap_or(i64::MIN);
                    (actor.clone(), newest)
                })
                .max_by_key(|(_, t)| *t)
                .map(|(actor, _)| actor)
                .unwrap_or_else(|| cycle.cycle[0].clone())
        }
    };
    let freed = locks.force_release_all(&victim);
    if freed.is_empty() {
        warn!(victim = %victim, "deadlock victim held no locks at resolution time");
    } else {
        info!(victim = %victim, ?freed, "deadlock resolved by force-release");
    }
    Some(victim)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
