// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod banker;
mod deadlock;
mod locks;
mod saga;
mod sync;

pub use banker::{Banker, BankerDenial, BankerSnapshot};
pub use deadlock::{detect_deadlocks, resolve_deadlock, DeadlockCycle, ResolutionStrategy};
pub use locks::{LockManager, LockSnapshot};
pub use saga::{run_saga, SagaReport, SagaStep};
pub use sync::{BarrierSet, Collected, ResultCollector, SemaphoreSet};

/// Failures of the coordination primitives.
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },
    #[error("{actor} is already waiting for {resource}")]
    AlreadyWaiting { resource: String, actor: String },
    #[error("{actor} aborted as deadlock victim")]
    AbortedForDeadlock { actor: String },
}
