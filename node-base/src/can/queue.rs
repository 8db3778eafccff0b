/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bounded FIFO of CAN frames.
//!
//! A fixed ring of `size` slots with explicit `next_in` / `next_out`
//! indices.  The queue never overwrites: pushing into a full queue hands the
//! frame back to the caller, which drops it and records the loss.

use super::CanMessage;

#[derive(Debug, Clone)]
pub struct CanQueue {
    slots: Vec<CanMessage>,
    count: usize,
    next_in: usize,
    next_out: usize,
}

impl CanQueue {
    /// Create a queue with room for `size` frames.
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![CanMessage::default(); size],
            count: 0,
            next_in: 0,
            next_out: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.slots.len()
    }

    /// Append `msg`; a full queue returns it unchanged as `Err`.
    pub fn push(&mut self, msg: CanMessage) -> Result<(), CanMessage> {
        if self.is_full() {
            return Err(msg);
        }
        self.slots[self.next_in] = msg;
        self.next_in = (self.next_in + 1) % self.slots.len();
        self.count += 1;
        Ok(())
    }

    /// Remove and return the oldest frame.
    pub fn pop(&mut self) -> Option<CanMessage> {
        if self.is_empty() {
            return None;
        }
        let msg = self.slots[self.next_out];
        self.next_out = (self.next_out + 1) % self.slots.len();
        self.count -= 1;
        Some(msg)
    }

    /// Oldest frame without removing it.
    pub fn peek(&self) -> Option<&CanMessage> {
        if self.is_empty() {
            None
        } else {
            Some(&self.slots[self.next_out])
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
