use std::collections::HashSet;

use crate::protocol::Item;

/// Remembers the identifiers of the previous poll and reports which items of
/// the next poll are new.
///
/// "New" is decided by identifier membership only; timestamps play no part.
/// Until the first snapshot has been recorded there is no baseline, and when
/// `skip_initial` is set that first snapshot yields nothing.
#[derive(Debug, Clone)]
pub struct SnapshotTracker {
    previous: Option<HashSet<String>>,
    skip_initial: bool,
}

impl SnapshotTracker {
    pub fn new(skip_initial: bool) -> Self {
        Self {
            previous: None,
            skip_initial,
        }
    }

    /// Replace the stored snapshot with `current` and return the items that
    /// were absent from the previous one, oldest first.
    pub fn observe(&mut self, current: &[Item]) -> Vec<Item> {
        let names: HashSet<String> = current.iter().map(|item| item.name.clone()).collect();

        let mut fresh: Vec<Item> = match &self.previous {
            None if self.skip_initial => Vec::new(),
            None => current.to_vec(),
            Some(prev) => current
                .iter()
                .filter(|item| !prev.contains(&item.name))
                .cloned()
                .collect(),
        };
        fresh.sort_by_key(|item| item.created);

        self.previous = Some(names);
        fresh
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    /// Number of identifiers in the stored snapshot.
    pub fn len(&self) -> usize {
        self.previous.as_ref().map_or(0, HashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
