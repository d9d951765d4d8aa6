// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery priority, lane 0 (low) through lane 3 (critical).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn lane(self) -> usize {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }

    pub fn from_lane(lane: usize) -> Option<Priority> {
        match lane {
            0 => Some(Priority::Low),
            1 => Some(Priority::Normal),
            2 => Some(Priority::High),
            3 => Some(Priority::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Tell,
    Ask,
    Reply,
}

/// One inter-actor message.
///
/// `hops` records every actor the envelope has been routed through; a
/// duplicate entry means a routing loop, and the envelope is dropped rather
/// than delivered again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub from: String,
    /// Recipient actor id, or `"*"` for broadcast fan-out.
    pub to: String,
    pub kind: EnvelopeKind,
    pub payload: Value,
    pub priority: Priority,
    pub timestamp_ms: i64,
    /// Dropped at pop once this many milliseconds have elapsed.
    pub ttl_ms: Option<u64>,
    pub hops: Vec<String>,
    pub topic: Option<String>,
    pub correlation_id: Option<String>,
}

impl Envelope {
    pub fn tell(from: impl Into<String>, to: impl Into<String>, payload: Value) -> Self {
        Self::new(from, to, EnvelopeKind::Tell, payload)
    }

    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: EnvelopeKind,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind,
            payload,
            priority: Priority::Normal,
            timestamp_ms: Utc::now().timestamp_millis(),
            ttl_ms: None,
            hops: Vec::new(),
            topic: None,
            correlation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// True once the envelope's ttl has elapsed relative to `now_ms`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match self.ttl_ms {
            Some(ttl) => now_ms.saturating_sub(self.timestamp_ms) >= ttl as i64,
            None => false,
        }
    }

    /// Record a routing hop.  Returns `false` (and leaves the list alone)
    /// when the actor is already present — the loop-protection signal.
    pub fn record_hop(&mut self, actor: &str) -> bool {
        if self.hops.iter().any(|h| h == actor) {
            return false;
        }
        self.hops.push(actor.to_string());
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_lanes_are_dense() {
        for lane in 0..Priority::COUNT {
            assert_eq!(Priority::from_lane(lane).unwrap().lane(), lane);
        }
        assert!(Priority::from_lane(4).is_none());
    }

    #[test]
    fn priority_order_low_to_critical() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
    }

    #[test]
    fn new_envelope_has_unique_id_and_timestamp() {
        let a = Envelope::tell("a", "b", json!(1));
        let b = Envelope::tell("a", "b", json!(1));
        assert_ne!(a.id, b.id);
        assert!(a.timestamp_ms > 0);
    }

    #[test]
    fn not_expired_without_ttl() {
        let e = Envelope::tell("a", "b", json!(null));
        assert!(!e.is_expired(e.timestamp_ms + 1_000_000));
    }

    #[test]
    fn expired_after_ttl_elapses() {
        let e = Envelope::tell("a", "b", json!(null)).with_ttl(50);
        assert!(!e.is_expired(e.timestamp_ms + 49));
        assert!(e.is_expired(e.timestamp_ms + 50));
    }

    #[test]
    fn record_hop_rejects_duplicates() {
        let mut e = Envelope::tell("a", "b", json!(null));
        assert!(e.record_hop("b"));
        assert!(e.record_hop("c"));
        assert!(!e.record_hop("b"), "duplicate hop must be rejected");
        assert_eq!(e.hops, vec!["b", "c"]);
    }

    #[test]
    fn builder_setters_apply() {
        let e = Envelope::tell("a", "b", json!(null))
            .with_priority(Priority::Critical)
            .with_ttl(10)
            .with_topic("builds")
            .with_correlation("corr-1");
        assert_eq!(e.priority, Priority::Critical);
        assert_eq!(e.ttl_ms, Some(10));
        assert_eq!(e.topic.as_deref(), Some("builds"));
        assert_eq!(e.correlation_id.as_deref(), Some("corr-1"));
    }
}
