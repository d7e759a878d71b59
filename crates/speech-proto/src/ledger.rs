use std::collections::HashSet;

/// Identifiers that have already been handed to the playback driver.
///
/// Entries are only ever added; the set shrinks solely through [`clear`].
///
/// [`clear`]: DedupLedger::clear
#[derive(Debug, Default, Clone)]
pub struct DedupLedger {
    played: HashSet<String>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.played.contains(name)
    }

    /// Returns `false` if the name was already recorded.
    pub fn mark(&mut self, name: &str) -> bool {
        self.played.insert(name.to_string())
    }

    pub fn len(&self) -> usize {
        self.played.len()
    }

    pub fn is_empty(&self) -> bool {
        self.played.is_empty()
    }

    pub fn clear(&mut self) {
        self.played.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_idempotent() {
        let mut ledger = DedupLedger::new();
        assert!(ledger.mark("a.mp3"));
        assert!(!ledger.mark("a.mp3"));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains("a.mp3"));
        assert!(!ledger.contains("b.mp3"));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut ledger = DedupLedger::new();
        ledger.mark("a.mp3");
        ledger.mark("b.mp3");
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(!ledger.contains("a.mp3"));
    }
}
