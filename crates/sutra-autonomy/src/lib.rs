// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod checkpoint;
mod controller;
mod errors;
mod events;
mod retry;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use controller::{AutonomyController, HealthReport};
pub use errors::{classify_error, ErrorClass};
pub use events::{AutonomyEvent, EventSink};
pub use retry::with_retry;
