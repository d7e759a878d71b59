use crate::ledger::DedupLedger;
use crate::protocol::Item;
use tracing::{debug, info};

/// Why an item was refused by [`PlaybackQueue::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Blank identifier.
    Malformed,
    AlreadyQueued,
    AlreadyPlayed,
}

/// Items waiting to be spoken, oldest `created` first.
///
/// Invariants: no identifier appears twice, and the order is ascending by
/// creation time with ties kept in insertion order.
#[derive(Debug, Default, Clone)]
pub struct PlaybackQueue {
    items: Vec<Item>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item` unless it is malformed, already queued, or already in
    /// the ledger.  Returns the new queue length on success.
    pub fn admit(&mut self, item: Item, ledger: &DedupLedger) -> Result<usize, RejectReason> {
        self.clean();

        if item.is_malformed() {
            return Err(RejectReason::Malformed);
        }
        if self.contains(&item.name) {
            return Err(RejectReason::AlreadyQueued);
        }
        if ledger.contains(&item.name) {
            return Err(RejectReason::AlreadyPlayed);
        }

        info!("queue: added {}", item.name);
        self.items.push(item);
        self.prioritize();
        Ok(self.items.len())
    }

    /// Drop entries with a blank identifier.  Returns how many were removed.
    pub fn clean(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_malformed());
        let removed = before - self.items.len();
        if removed > 0 {
            info!("queue: cleaned {} invalid entries", removed);
        }
        removed
    }

    /// Stable sort by creation time.
    pub fn prioritize(&mut self) {
        self.items.sort_by_key(|item| item.created);
        debug!("queue: reprioritised by creation time");
    }

    /// Remove and return the earliest item.
    pub fn dequeue(&mut self) -> Option<Item> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|item| item.name == name)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|item| item.name.clone()).collect()
    }

    /// Raw push that bypasses admission.  Only for exercising `clean` in tests.
    #[cfg(test)]
    pub(crate) fn push_unchecked(&mut self, item: Item) {
        self.items.push(item);
    }
}
