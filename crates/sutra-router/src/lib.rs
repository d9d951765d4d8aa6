// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod context;
mod linucb;
mod router;
mod tier;

pub use context::{extract_context, TuriyaContext, DIM};
pub use linucb::ArmState;
pub use router::{Decision, Router, RouterError, RouterState, RouterStats, TierStats};
pub use tier::Tier;
