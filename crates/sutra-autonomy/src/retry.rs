// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::errors::{classify_error, ErrorClass};
use crate::events::{AutonomyEvent, EventSink};

/// How many identical unknown-class messages escalate to fatal within one
/// retry loop.
const UNKNOWN_ESCALATION: u32 = 3;

/// Run `op` until it succeeds or retries are exhausted.
///
/// Only transient errors are retried, with exponential backoff
/// `min(base_delay · 2^attempt, max_delay)`.  Fatal errors return at once.
/// Unknown errors are given the benefit of the doubt twice; the third
/// occurrence of the same message string is treated as fatal.
///
/// Total attempts = 1 initial + `max_retries`.
pub async fn with_retry<T, F, Fut>(
    mut op: F,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    sink: Option<&EventSink>,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut unknown_seen: HashMap<String, u32> = HashMap::new();

    for attempt in 0..=max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let mut class = classify_error(&err);
                if class == ErrorClass::Unknown {
                    let count = unknown_seen.entry(err.to_string()).or_insert(0);
                    *count += 1;
                    if *count >= UNKNOWN_ESCALATION {
                        debug!(error = %err, "repeated unknown error escalated to fatal");
                        class = ErrorClass::Fatal;
                    }
                }
                if let Some(sink) = sink {
                    sink(AutonomyEvent::ErrorClassified {
                        class,
                        message: err.to_string(),
                    });
                }
                let retryable = !matches!(class, ErrorClass::Fatal) && attempt < max_retries;
                if !retryable {
                    return Err(err);
                }
                let delay = base_delay_ms
                    .saturating_mul(1u64 << attempt.min(20))
                    .min(max_delay_ms);
                debug!(attempt, delay_ms = delay, error = %err, "retrying after backoff");
                if let Some(sink) = sink {
                    sink(AutonomyEvent::Retry {
                        attempt: attempt + 1,
                        delay_ms: delay,
                    });
                }
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
    unreachable!("loop returns on success or final error")
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
