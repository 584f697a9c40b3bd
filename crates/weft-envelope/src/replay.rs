//! Sliding-window replay protection, one window per observed source.

use std::collections::HashMap;

use weft_core::AgentId;

use crate::error::{EnvelopeError, EnvelopeResult};

/// Window width in message ids. Must be a multiple of 64.
pub const REPLAY_WINDOW: u64 = 1024;

/// Sliding bitset of recently accepted message ids from one source.
///
/// The window advances monotonically with the highest accepted id. Ids may
/// arrive out of order inside the window; an id below the low-water mark
/// (`highest - WINDOW`) or one already accepted is a replay.
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    bits: [u64; (REPLAY_WINDOW / 64) as usize],
    highest: u64,
}

impl ReplayWindow {
    /// Fresh window with no accepted ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits: [0; (REPLAY_WINDOW / 64) as usize],
            highest: 0,
        }
    }

    /// Record `msg_id` as accepted.
    ///
    /// # Errors
    ///
    /// Returns `ReplayDetected` for duplicates within the window and for
    /// ids at or below the low-water mark.
    pub fn observe(&mut self, source: AgentId, msg_id: u64) -> EnvelopeResult<()> {
        let replay = || EnvelopeError::ReplayDetected { sender: source, msg_id };
        if msg_id == 0 {
            // Ids start at 1; 0 marks an unstamped message.
            return Err(replay());
        }
        if msg_id > self.highest {
            let advance = msg_id - self.highest;
            if advance >= REPLAY_WINDOW {
                // The whole window scrolled past; nothing to retain.
                self.bits.fill(0);
            } else {
                for skipped in 1..=advance {
                    self.clear(self.highest + skipped);
                }
            }
            self.highest = msg_id;
            self.set(msg_id);
            return Ok(());
        }
        let age = self.highest - msg_id;
        if age >= REPLAY_WINDOW {
            return Err(replay());
        }
        if self.test(msg_id) {
            return Err(replay());
        }
        self.set(msg_id);
        Ok(())
    }

    /// Highest message id accepted so far.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.highest
    }

    fn slot(msg_id: u64) -> (usize, u64) {
        let bit = msg_id % REPLAY_WINDOW;
        ((bit / 64) as usize, 1u64 << (bit % 64))
    }

    fn set(&mut self, msg_id: u64) {
        let (word, mask) = Self::slot(msg_id);
        self.bits[word] |= mask;
    }

    fn clear(&mut self, msg_id: u64) {
        let (word, mask) = Self::slot(msg_id);
        self.bits[word] &= !mask;
    }

    fn test(&self, msg_id: u64) -> bool {
        let (word, mask) = Self::slot(msg_id);
        self.bits[word] & mask != 0
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-receiver replay state: one [`ReplayWindow`] per observed source.
///
/// Owned by a single inbox drain task, so no interior locking is needed.
#[derive(Debug, Default)]
pub struct ReplayGuard {
    windows: HashMap<AgentId, ReplayWindow>,
}

impl ReplayGuard {
    /// Empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `msg_id` from `source`.
    ///
    /// # Errors
    ///
    /// Returns `ReplayDetected` as [`ReplayWindow::observe`].
    pub fn observe(&mut self, source: AgentId, msg_id: u64) -> EnvelopeResult<()> {
        self.windows
            .entry(source)
            .or_default()
            .observe(source, msg_id)
    }

    /// Drop all state for a source (used when a binding is revoked).
    pub fn forget(&mut self, source: AgentId) {
        self.windows.remove(&source);
    }
}
