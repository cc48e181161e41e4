use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Counters exposed through the network status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub stores: u64,
    pub updates: u64,
    pub retrieves: u64,
    pub deletes: u64,
    pub local_only_writes: u64,
    pub consensus_commits: u64,
    pub consensus_rejections: u64,
    pub consensus_timeouts: u64,
    pub checksum_mismatches: u64,
    pub sync_successes: u64,
    pub sync_retries: u64,
    pub sync_failures: u64,
    pub superseded: u64,
}

/// One finished sync attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub operation_id: String,
    pub fold_id: String,
    pub operation_type: String,
    pub outcome: String,
    pub at: u64,
}

/// Append-only log trimmed to a cap by the cleanup loop.
#[derive(Debug, Default, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
}

impl<T: Clone> BoundedHistory<T> {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    /// Drop the oldest entries beyond `limit`. Returns how many were dropped.
    pub fn trim(&mut self, limit: usize) -> usize {
        let excess = self.entries.len().saturating_sub(limit);
        self.entries.drain(..excess);
        excess
    }

    /// Most recent entries last.
    pub fn entries(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_drops_oldest() {
        let mut history = BoundedHistory::new();
        for i in 0..5 {
            history.push(i);
        }
        assert_eq!(history.trim(3), 2);
        assert_eq!(history.entries(), vec![2, 3, 4]);
        assert_eq!(history.trim(3), 0);
    }
}
