// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use tracing::debug;

use sutra_config::RouterConfig;

use crate::context::TuriyaContext;
use crate::linucb::{Arm, ArmState};
use crate::tier::Tier;

/// A routing decision.  Hand it back to [`Router::record_outcome`] together
/// with the observed reward to close the learning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub tier: Tier,
    /// 1 − width/(width+1): high when the chosen arm's estimate is tight.
    pub confidence: f64,
    pub cost_estimate: f64,
    pub rationale: String,
    pub context: TuriyaContext,
    pub arm_index: usize,
}

/// Serialized router state; `A` and `b` travel as flattened float vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterState {
    pub arms: Vec<ArmState>,
    pub total_requests: u64,
    pub total_cost: f64,
    pub opus_baseline_cost: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("invalid router state: {0}")]
    InvalidState(String),
}

/// Per-tier statistics plus aggregate savings against an all-opus baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStats {
    pub tiers: Vec<TierStats>,
    pub total_requests: u64,
    pub total_cost: f64,
    pub opus_baseline_cost: f64,
    pub cost_savings: f64,
    pub savings_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: Tier,
    pub calls: u64,
    pub total_cost: f64,
    pub avg_reward: f64,
    pub alpha: f64,
    pub beta: f64,
}

/// Contextual bandit over the four model tiers.
///
/// `classify` is read-only; all mutation happens in `record_outcome`.
pub struct Router {
    cfg: RouterConfig,
    arms: [Arm; 4],
    total_requests: u64,
    total_cost: f64,
    opus_baseline_cost: f64,
}

impl Router {
    pub fn new(cfg: RouterConfig) -> Self {
        Self {
            cfg,
            arms: Default::default(),
            total_requests: 0,
            total_cost: 0.0,
            opus_baseline_cost: 0.0,
        }
    }

    fn cost_of(&self, tier: Tier) -> f64 {
        self.cfg.tier_costs[tier.index()]
    }

    fn total_plays(&self) -> u64 {
        self.arms.iter().map(|a| a.plays).sum()
    }

    /// Choose a tier for the given context.
    ///
    /// Below `arms × 2` recorded plays the bandit has no usable posterior, so
    /// a fixed heuristic band on the weighted feature sum decides instead.
    pub fn classify(&self, context: TuriyaContext) -> Decision {
        if self.total_plays() < (self.arms.len() as u64) * 2 {
            return self.cold_start(context);
        }

        let x = context.vectorize();
        let mut best: Option<(Tier, f64, f64)> = None;
        for tier in Tier::ALL {
            let (expected, width) = self.arms[tier.index()].expected_and_width(&x);
            let exploration = self.cfg.linucb_alpha * width;
            let score = expected + exploration;
            // Strict greater-than keeps the earlier (cheaper) tier on ties.
            if best.map(|(_, s, _)| score > s).unwrap_or(true) {
                best = Some((tier, score, exploration));
            }
        }
        // Tier::ALL is non-empty, so `best` is always set.
        let (tier, score, exploration) = best.unwrap_or((Tier::Sonnet, 0.0, 0.0));
        let confidence = 1.0 - exploration / (exploration + 1.0);

        debug!(%tier, score, confidence, "linucb decision");
        Decision {
            tier,
            confidence,
            cost_estimate: self.cost_of(tier),
            rationale: format!("linucb score {score:.3} (exploration {exploration:.3})"),
            context,
            arm_index: tier.index(),
        }
    }

    fn cold_start(&self, context: TuriyaContext) -> Decision {
        let score = 0.25 * context.complexity
            + 0.2 * context.precision
            + 0.2 * context.code_ratio
            + 0.2 * context.creativity
            + 0.15 * context.urgency;

        let mut tier = if score < 0.1 {
            Tier::NoLlm
        } else if score < 0.25 {
            Tier::Haiku
        } else if score < 0.55 {
            Tier::Sonnet
        } else {
            Tier::Opus
        };

        // Overrides: very complex work always gets opus; anything urgent at
        // least gets a model.
        if context.complexity > 0.7 {
            tier = Tier::Opus;
        } else if tier == Tier::NoLlm && context.urgency > 0.3 {
            tier = Tier::Haiku;
        }

        debug!(%tier, score, "cold-start decision");
        Decision {
            tier,
            confidence: 0.5,
            cost_estimate: self.cost_of(tier),
            rationale: format!("cold-start heuristic score {score:.3}"),
            context,
            arm_index: tier.index(),
        }
    }

    /// Record the observed reward for a prior decision.
    ///
    /// Rewards outside [0, 1] are clamped, never rejected — outcome recording
    /// must not fail.
    pub fn record_outcome(&mut self, decision: &Decision, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        let x = decision.context.vectorize();
        let cost = self.cost_of(decision.tier);
        self.arms[decision.arm_index].update(&x, reward, cost);
        self.total_requests += 1;
        self.total_cost += cost;
        self.opus_baseline_cost += self.cost_of(Tier::Opus);
    }

    pub fn stats(&self) -> RouterStats {
        let tiers = Tier::ALL
            .iter()
            .map(|&tier| {
                let arm = &self.arms[tier.index()];
                TierStats {
                    tier,
                    calls: arm.plays,
                    total_cost: arm.total_cost,
                    avg_reward: arm.avg_reward(),
                    alpha: arm.alpha,
                    beta: arm.beta,
                }
            })
            .collect();
        let cost_savings = self.opus_baseline_cost - self.total_cost;
        let savings_percent = if self.opus_baseline_cost > 0.0 {
            cost_savings / self.opus_baseline_cost * 100.0
        } else {
            0.0
        };
        RouterStats {
            tiers,
            total_requests: self.total_requests,
            total_cost: self.total_cost,
            opus_baseline_cost: self.opus_baseline_cost,
            cost_savings,
            savings_percent,
        }
    }

    /// Snapshot the full learning state.
    pub fn serialize(&self) -> RouterState {
        RouterState {
            arms: self.arms.iter().map(ArmState::from).collect(),
            total_requests: self.total_requests,
            total_cost: self.total_cost,
            opus_baseline_cost: self.opus_baseline_cost,
        }
    }

    /// Restore a router from a snapshot; the arm count and matrix dimensions
    /// must match the current build.
    pub fn deserialize(cfg: RouterConfig, state: &RouterState) -> Result<Self, RouterError> {
        if state.arms.len() != 4 {
            return Err(RouterError::InvalidState(format!(
                "expected 4 arms, got {}",
                state.arms.len()
            )));
        }
        let mut arms: [Arm; 4] = Default::default();
        for (i, s) in state.arms.iter().enumerate() {
            arms[i] = Arm::try_from(s).map_err(RouterError::InvalidState)?;
        }
        Ok(Self {
            cfg,
            arms,
            total_requests: state.total_requests,
            total_cost: state.total_cost,
            opus_baseline_cost: state.opus_baseline_cost,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
