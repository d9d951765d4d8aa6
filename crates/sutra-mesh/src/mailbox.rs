// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use chrono::Utc;

use crate::envelope::{Envelope, Priority};

/// Bounded per-actor queue with one FIFO lane per priority.
///
/// `pop` always returns the oldest envelope of the highest non-empty lane;
/// the size bound applies across all lanes together.
#[derive(Debug)]
pub struct Mailbox {
    lanes: [VecDeque<Envelope>; Priority::COUNT],
    max: usize,
}

impl Mailbox {
    pub fn new(max: usize) -> Self {
        Self {
            lanes: Default::default(),
            max,
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max
    }

    /// Enqueue an envelope.  Returns `false` (envelope dropped) when full.
    pub fn push(&mut self, envelope: Envelope) -> bool {
        if self.is_full() {
            return false;
        }
        self.lanes[envelope.priority.lane()].push_back(envelope);
        true
    }

    /// Dequeue the oldest envelope of the highest non-empty lane.
    /// Expired envelopes are discarded on the way.
    pub fn pop(&mut self) -> Option<Envelope> {
        let now = Utc::now().timestamp_millis();
        for lane in self.lanes.iter_mut().rev() {
            while let Some(envelope) = lane.pop_front() {
                if envelope.is_expired(now) {
                    continue;
                }
                return Some(envelope);
            }
        }
        None
    }

    /// The envelope `pop` would return, without removing it.  Does not
    /// discard expired envelopes.
    pub fn peek(&self) -> Option<&Envelope> {
        self.lanes.iter().rev().find_map(VecDeque::front)
    }

    /// Empty the mailbox, highest lane first, FIFO within each lane.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::with_capacity(self.len());
        for lane in self.lanes.iter_mut().rev() {
            out.extend(lane.drain(..));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
