// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod compact;
mod state;
mod summarize;

pub use compact::{
    compact_tiered, compact_tiered_with, emergency_compact, serialize_history, should_compact,
    tier, tool_pattern_summary, CompactionTier,
};
pub use state::AgentState;
pub use summarize::LocalSummariser;
