// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Offline,
}

/// One registered worker agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistryEntry {
    pub id: String,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub expertise: HashSet<String>,
    pub status: AgentStatus,
    /// Utilization in [0, 1]; clamped on every write.
    pub load: f64,
    pub registered_at_ms: i64,
    pub last_heartbeat_ms: i64,
    pub metadata: serde_json::Value,
}

impl AgentRegistryEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: HashSet::new(),
            expertise: HashSet::new(),
            status: AgentStatus::Idle,
            load: 0.0,
            registered_at_ms: now,
            last_heartbeat_ms: now,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_capabilities<I: IntoIterator<Item = S>, S: Into<String>>(mut self, caps: I) -> Self {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expertise<I: IntoIterator<Item = S>, S: Into<String>>(mut self, exp: I) -> Self {
        self.expertise = exp.into_iter().map(Into::into).collect();
        self
    }
}

/// Selection criteria for [`AgentRegistry::find`].
#[derive(Debug, Clone, Default)]
pub struct AgentQuery {
    pub capabilities: Vec<String>,
    pub expertise: Vec<String>,
    /// When set, only this status is considered.  Default: idle and busy.
    pub status: Option<AgentStatus>,
    /// Candidates with `load > max_load` are excluded.
    pub max_load: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry full ({0} agents)")]
    RegistryFull(usize),
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

/// |A∩B| / |A∪B|, zero when both sets are empty.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Directory of worker agents with capability/expertise matching.
pub struct AgentRegistry {
    entries: HashMap<String, AgentRegistryEntry>,
    max_agents: usize,
    heartbeat_timeout_ms: u64,
}

impl AgentRegistry {
    pub fn new(max_agents: usize, heartbeat_timeout_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_agents,
            heartbeat_timeout_ms,
        }
    }

    /// Add or refresh an agent.  Re-registration keeps the original
    /// `registered_at_ms` and is exempt from the capacity check.
    pub fn register(&mut self, mut entry: AgentRegistryEntry) -> Result<(), RegistryError> {
        entry.load = entry.load.clamp(0.0, 1.0);
        if let Some(existing) = self.entries.get(&entry.id) {
            entry.registered_at_ms = existing.registered_at_ms;
        } else if self.entries.len() >= self.max_agents {
            return Err(RegistryError::RegistryFull(self.max_agents));
        }
        debug!(agent = %entry.id, "registered agent");
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn update_status(
        &mut self,
        id: &str,
        status: AgentStatus,
        load: Option<f64>,
    ) -> Result<(), RegistryError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownAgent(id.to_string()))?;
        entry.status = status;
        if let Some(l) = load {
            entry.load = l.clamp(0.0, 1.0);
        }
        Ok(())
    }

    pub fn heartbeat(&mut self, id: &str) -> Result<(), RegistryError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownAgent(id.to_string()))?;
        entry.last_heartbeat_ms = Utc::now().timestamp_millis();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&AgentRegistryEntry> {
        self.entries.get(id)
    }

    pub fn get_all(&self) -> Vec<&AgentRegistryEntry> {
        self.entries.values().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Score: `0.6·capJ + 0.3·expJ + 0.1·avail`, where avail folds status
    /// and inverse load together.
    fn score(entry: &AgentRegistryEntry, caps: &HashSet<String>, exp: &HashSet<String>, query_has_expertise: bool) -> f64 {
        let cap_j = jaccard(caps, &entry.capabilities);
        let exp_j = if query_has_expertise && (exp.is_empty() || entry.expertise.is_empty()) {
            0.0
        } else {
            jaccard(exp, &entry.expertise)
        };
        let status_weight = match entry.status {
            AgentStatus::Idle => 1.0,
            AgentStatus::Busy => 0.4,
            AgentStatus::Offline => 0.0,
        };
        let avail = status_weight * (1.0 - entry.load);
        0.6 * cap_j + 0.3 * exp_j + 0.1 * avail
    }

    /// All matching agents, best first.  Ties break toward the more recent
    /// heartbeat.
    pub fn find(&self, query: &AgentQuery) -> Vec<(AgentRegistryEntry, f64)> {
        let caps: HashSet<String> = query.capabilities.iter().cloned().collect();
        let exp: HashSet<String> = query.expertise.iter().cloned().collect();
        let query_has_expertise = !query.expertise.is_empty();

        let mut scored: Vec<(AgentRegistryEntry, f64)> = self
            .entries
            .values()
            .filter(|e| match query.status {
                Some(s) => e.status == s,
                None => matches!(e.status, AgentStatus::Idle | AgentStatus::Busy),
            })
            .filter(|e| query.max_load.map(|m| e.load <= m).unwrap_or(true))
            .map(|e| {
                let s = Self::score(e, &caps, &exp, query_has_expertise);
                (e.clone(), s)
            })
            .collect();

        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_heartbeat_ms.cmp(&a.last_heartbeat_ms))
        });
        scored
    }

    /// Best single match for a capability set, or `None` when nothing scores.
    pub fn find_best(
        &self,
        capabilities: &[String],
        expertise: Option<&[String]>,
    ) -> Option<AgentRegistryEntry> {
        let query = AgentQuery {
            capabilities: capabilities.to_vec(),
            expertise: expertise.map(|e| e.to_vec()).unwrap_or_default(),
            ..Default::default()
        };
        self.find(&query).into_iter().next().map(|(e, _)| e)
    }

    /// Mark agents silent past the timeout as offline; returns the changed ids.
    pub fn sweep(&mut self, timeout_ms: Option<u64>) -> Vec<String> {
        let timeout = timeout_ms.unwrap_or(self.heartbeat_timeout_ms) as i64;
        let now = Utc::now().timestamp_millis();
        let mut changed = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.status != AgentStatus::Offline
                && now.saturating_sub(entry.last_heartbeat_ms) > timeout
            {
                entry.status = AgentStatus::Offline;
                changed.push(entry.id.clone());
            }
        }
        changed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
