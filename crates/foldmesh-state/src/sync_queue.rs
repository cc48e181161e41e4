// Pending propagation work for one node.
//
// INVARIANTS:
// 1. New operations are FIFO by timestamp; priority only breaks timestamp ties
// 2. Operations for the same fold leave the queue in the order they entered it
// 3. An operation is attempted at most `max_retries` times, then dropped and
//    counted as failed
// 4. A retry never overtakes a newer operation for the same fold: it is
//    dropped as superseded instead

use std::collections::{BTreeSet, VecDeque};

use foldmesh_core::{now_millis, Fold, FoldMeshError, OperationType};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub fold_id: String,
    pub source_node: String,
    pub target_nodes: BTreeSet<String>,
    /// Full fold for create/update; `None` for delete.
    pub payload: Option<Fold>,
    pub timestamp: u64,
    /// Higher runs first among operations enqueued in the same millisecond.
    pub priority: u8,
    pub retry_count: u32,
    pub max_retries: u32,
    pub consensus_required: bool,
}

impl SyncOperation {
    pub fn new(
        operation_type: OperationType,
        fold_id: impl Into<String>,
        source_node: impl Into<String>,
        target_nodes: impl IntoIterator<Item = String>,
        payload: Option<Fold>,
        consensus_required: bool,
        max_retries: u32,
    ) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            operation_type,
            fold_id: fold_id.into(),
            source_node: source_node.into(),
            target_nodes: target_nodes.into_iter().collect(),
            payload,
            timestamp: now_millis(),
            priority: 0,
            retry_count: 0,
            max_retries,
            consensus_required,
        }
    }

    /// Default tiebreak rank: deletes, then updates, then creates.
    pub fn priority_for(operation_type: OperationType) -> u8 {
        match operation_type {
            OperationType::Delete => 2,
            OperationType::Update => 1,
            OperationType::Create => 0,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attempts made so far, counting the one in progress.
    pub fn attempts(&self) -> u32 {
        self.retry_count + 1
    }

    /// Error reported when the attempt in progress was the last one.
    pub fn exhausted_error(&self) -> FoldMeshError {
        FoldMeshError::RetryExhausted {
            operation_id: self.operation_id.clone(),
            attempts: self.attempts(),
        }
    }
}

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryOutcome {
    /// Re-enqueued at the tail for attempt number `attempt`.
    Requeued { attempt: u32 },
    /// Dropped because a newer operation for the same fold is pending.
    Superseded,
    /// Dropped after the final attempt.
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub superseded: u64,
}

#[derive(Debug, Default, Clone)]
pub struct SyncQueue {
    pending: VecDeque<SyncOperation>,
    stats: SyncQueueStats,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new operation.
    pub fn enqueue(&mut self, operation: SyncOperation) {
        let mut position = self.pending.len();
        while position > 0 {
            let ahead = &self.pending[position - 1];
            let tie = ahead.timestamp == operation.timestamp && ahead.priority < operation.priority;
            if !tie || ahead.fold_id == operation.fold_id {
                break;
            }
            position -= 1;
        }
        debug!(
            "[SyncQueue] queued {} {} for fold {} -> {:?}",
            operation.operation_type.as_str(),
            operation.operation_id,
            operation.fold_id,
            operation.target_nodes
        );
        self.pending.insert(position, operation);
        self.stats.enqueued += 1;
    }

    pub fn pop(&mut self) -> Option<SyncOperation> {
        self.pending.pop_front()
    }

    pub fn complete(&mut self, operation: &SyncOperation) {
        self.stats.completed += 1;
        debug!("[SyncQueue] operation {} completed", operation.operation_id);
    }

    /// Handle a failed attempt against `failed_targets`.
    ///
    /// The retry, if any, only targets the peers that failed.
    pub fn fail(&mut self, mut operation: SyncOperation, failed_targets: BTreeSet<String>) -> RetryOutcome {
        operation.retry_count += 1;

        if operation.retry_count >= operation.max_retries {
            self.stats.failed += 1;
            warn!(
                "[SyncQueue] operation {} for fold {} dropped after {} attempts",
                operation.operation_id, operation.fold_id, operation.retry_count
            );
            return RetryOutcome::Exhausted;
        }

        if self.pending.iter().any(|queued| queued.fold_id == operation.fold_id) {
            self.stats.superseded += 1;
            info!(
                "[SyncQueue] retry of {} superseded by a newer operation on fold {}",
                operation.operation_id, operation.fold_id
            );
            return RetryOutcome::Superseded;
        }

        operation.target_nodes = failed_targets;
        self.stats.retried += 1;
        let attempt = operation.attempts();
        debug!(
            "[SyncQueue] re-enqueued {} (attempt {}/{})",
            operation.operation_id, attempt, operation.max_retries
        );
        self.pending.push_back(operation);
        RetryOutcome::Requeued { attempt }
    }

    pub fn snapshot(&self) -> Vec<SyncOperation> {
        self.pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stats(&self) -> SyncQueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(fold_id: &str, timestamp: u64, priority: u8) -> SyncOperation {
        SyncOperation::new(
            OperationType::Create,
            fold_id,
            "self",
            vec!["b".to_string(), "c".to_string()],
            None,
            false,
            3,
        )
        .with_timestamp(timestamp)
        .with_priority(priority)
    }

    #[test]
    fn test_fifo_with_priority_tiebreak() {
        let mut queue = SyncQueue::new();
        queue.enqueue(op("a", 1, 0));
        queue.enqueue(op("b", 2, 0));
        queue.enqueue(op("c", 2, 5));
        queue.enqueue(op("d", 3, 9));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|o| o.fold_id).collect();
        assert_eq!(order, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_delete_ranks_ahead_of_create_in_same_millisecond() {
        let mut queue = SyncQueue::new();
        let create = op("a", 4, SyncOperation::priority_for(OperationType::Create));
        let mut delete = op("b", 4, SyncOperation::priority_for(OperationType::Delete));
        delete.operation_type = OperationType::Delete;
        queue.enqueue(create);
        queue.enqueue(delete);
        assert_eq!(queue.pop().unwrap().operation_type, OperationType::Delete);
        assert_eq!(queue.pop().unwrap().fold_id, "a");
    }

    #[test]
    fn test_same_fold_never_reordered_by_priority() {
        let mut queue = SyncQueue::new();
        let first = op("a", 7, 0);
        let first_id = first.operation_id.clone();
        queue.enqueue(first);
        queue.enqueue(op("a", 7, 9));
        assert_eq!(queue.pop().unwrap().operation_id, first_id);
    }

    #[test]
    fn test_retry_targets_only_failed_peers() {
        let mut queue = SyncQueue::new();
        queue.enqueue(op("a", 1, 0));
        let attempt = queue.pop().unwrap();
        let failed: BTreeSet<String> = ["c".to_string()].into_iter().collect();
        assert_eq!(queue.fail(attempt, failed.clone()), RetryOutcome::Requeued { attempt: 2 });
        let retry = queue.pop().unwrap();
        assert_eq!(retry.target_nodes, failed);
        assert_eq!(retry.retry_count, 1);
    }

    #[test]
    fn test_retry_bound() {
        let mut queue = SyncQueue::new();
        queue.enqueue(op("a", 1, 0));
        let mut attempts = 0;
        loop {
            let Some(current) = queue.pop() else { break };
            attempts += 1;
            let outcome = queue.fail(current, ["b".to_string()].into_iter().collect());
            if outcome == RetryOutcome::Exhausted {
                break;
            }
        }
        assert_eq!(attempts, 3);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.stats().retried, 2);
    }

    #[test]
    fn test_newer_operation_supersedes_retry() {
        let mut queue = SyncQueue::new();
        queue.enqueue(op("a", 1, 0));
        let stale = queue.pop().unwrap();
        queue.enqueue(op("a", 2, 0));
        assert_eq!(queue.fail(stale, BTreeSet::new()), RetryOutcome::Superseded);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().superseded, 1);
    }

    #[test]
    fn test_exhausted_error_reports_attempts() {
        let mut operation = op("a", 1, 0);
        operation.retry_count = 2;
        match operation.exhausted_error() {
            FoldMeshError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
