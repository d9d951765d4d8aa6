// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Model tier, ordered by cost: `no-llm < haiku < sonnet < opus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    NoLlm,
    Haiku,
    Sonnet,
    Opus,
}

impl Tier {
    /// All tiers in ascending cost order.
    pub const ALL: [Tier; 4] = [Tier::NoLlm, Tier::Haiku, Tier::Sonnet, Tier::Opus];

    /// Dense index into per-arm tables (0..4).
    pub fn index(self) -> usize {
        match self {
            Tier::NoLlm => 0,
            Tier::Haiku => 1,
            Tier::Sonnet => 2,
            Tier::Opus => 3,
        }
    }

    pub fn from_index(i: usize) -> Option<Tier> {
        Tier::ALL.get(i).copied()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tier::NoLlm => "no-llm",
            Tier::Haiku => "haiku",
            Tier::Sonnet => "sonnet",
            Tier::Opus => "opus",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-llm" => Ok(Tier::NoLlm),
            "haiku" => Ok(Tier::Haiku),
            "sonnet" => Ok(Tier::Sonnet),
            "opus" => Ok(Tier::Opus),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
