//! Sliding replay window over inbound nonce counters.

use std::collections::BTreeSet;

/// Tracks which nonce counters have been accepted from one peer.
///
/// Counters more than `size` below the highest accepted counter are rejected
/// outright; counters inside the window are rejected if already seen. Memory
/// is bounded by `size`.
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    size: u64,
    highest: Option<u64>,
    seen: BTreeSet<u64>,
}

impl ReplayWindow {
    /// Creates a window that remembers the last `size` counters.
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            size: size.max(1),
            highest: None,
            seen: BTreeSet::new(),
        }
    }

    /// Returns true if `counter` would be accepted.
    #[must_use]
    pub fn check(&self, counter: u64) -> bool {
        match self.highest {
            None => true,
            Some(highest) if counter > highest => true,
            Some(highest) => highest - counter < self.size && !self.seen.contains(&counter),
        }
    }

    /// Records `counter`, returning false if it is a replay or too old.
    pub fn accept(&mut self, counter: u64) -> bool {
        if !self.check(counter) {
            return false;
        }
        self.seen.insert(counter);
        let highest = self.highest.map_or(counter, |h| h.max(counter));
        self.highest = Some(highest);

        let floor = highest.saturating_sub(self.size - 1);
        self.seen = self.seen.split_off(&floor);
        true
    }

    /// Number of counters currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns true if nothing has been accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
