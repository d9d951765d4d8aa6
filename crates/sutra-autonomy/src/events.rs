// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use crate::errors::ErrorClass;

/// Best-effort observability events.  Sinks must not block; emission never
/// fails and never throws back into the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutonomyEvent {
    ErrorClassified { class: ErrorClass, message: String },
    Retry { attempt: u32, delay_ms: u64 },
    ToolDisabled(String),
    ToolReenabled(String),
    DegradedModeEntered(String),
    DegradedModeExited(String),
}

pub type EventSink = Arc<dyn Fn(AutonomyEvent) + Send + Sync>;
