//! Bounded history with a processed-level pointer.
//!
//! Poll cycles append snapshots; emission logic marks how far the history
//! has been acted upon. After a transition (enable/disable, reset) the
//! unprocessed tail is walked to re-emit suppressed statuses.

use chrono::{DateTime, Local};
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HistoryEntry<T> {
    pub value: T,
    pub at: DateTime<Local>,
}

/// Fixed-capacity ring of snapshots. Evicts oldest first; the processed
/// level is clamped on eviction so it always indexes into the buffer.
#[derive(Debug, Clone)]
pub struct HistoryList<T> {
    entries: VecDeque<HistoryEntry<T>>,
    capacity: usize,
    level: usize,
}

impl<T> HistoryList<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            level: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.level = self.level.saturating_sub(1);
        }
        self.entries.push_back(HistoryEntry {
            value,
            at: Local::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent value.
    pub fn last(&self) -> Option<&T> {
        self.entries.back().map(|entry| &entry.value)
    }

    /// Value `n` steps back from the most recent (`nth_back(0) == last()`).
    pub fn nth_back(&self, n: usize) -> Option<&T> {
        self.entries
            .len()
            .checked_sub(n + 1)
            .and_then(|index| self.entries.get(index))
            .map(|entry| &entry.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|entry| &entry.value)
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<T>> {
        self.entries.iter()
    }

    /// Number of entries already acted upon.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Mark the whole history as processed.
    pub fn mark_all_processed(&mut self) {
        self.level = self.entries.len();
    }

    pub fn set_level(&mut self, level: usize) {
        self.level = level.min(self.entries.len());
    }

    pub fn has_unprocessed(&self) -> bool {
        self.level < self.entries.len()
    }

    /// The tail that has not been acted upon yet, oldest first.
    pub fn unprocessed(&self) -> impl Iterator<Item = &T> {
        self.entries
            .iter()
            .skip(self.level)
            .map(|entry| &entry.value)
    }

    pub fn remove_last(&mut self) -> Option<T> {
        let entry = self.entries.pop_back()?;
        self.level = self.level.min(self.entries.len());
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.level = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(10)]
    fn size_stays_bounded(#[case] capacity: usize) {
        let mut history = HistoryList::new(capacity);
        for value in 0..capacity * 3 {
            history.push(value);
            assert!(history.len() <= capacity);
        }
        assert_eq!(history.len(), capacity);
    }

    #[test]
    fn eviction_drops_oldest_and_clamps_level() {
        let mut history = HistoryList::new(3);
        for value in 0..3 {
            history.push(value);
        }
        history.mark_all_processed();
        assert_eq!(history.level(), 3);

        history.push(3);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(history.level(), 2);
        assert_eq!(history.unprocessed().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn nth_back_counts_from_most_recent() {
        let mut history = HistoryList::new(5);
        for value in [10, 20, 30] {
            history.push(value);
        }
        assert_eq!(history.nth_back(0), Some(&30));
        assert_eq!(history.nth_back(2), Some(&10));
        assert_eq!(history.nth_back(3), None);
    }

    #[test]
    fn remove_last_keeps_level_consistent() {
        let mut history = HistoryList::new(3);
        history.push(1);
        history.push(2);
        history.mark_all_processed();
        assert_eq!(history.remove_last(), Some(2));
        assert_eq!(history.level(), 1);
        assert!(!history.has_unprocessed());
    }
}
