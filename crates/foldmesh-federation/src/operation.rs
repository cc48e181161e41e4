use std::collections::BTreeSet;
use std::fmt;

use foldmesh_core::now_millis;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Memory operation routed to a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Store,
    Retrieve,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Store => "store",
            OperationKind::Retrieve => "retrieve",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, OperationKind::Retrieve)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPayload {
    pub data: Option<Vec<u8>>,
    /// Region hint consumed by `GEOGRAPHIC` routing.
    pub region: Option<String>,
    /// Ask the target cluster to run node-level consensus.
    pub consensus_required: bool,
}

impl OperationPayload {
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_consensus(mut self) -> Self {
        self.consensus_required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossClusterOperation {
    pub operation_id: String,
    pub operation_type: OperationKind,
    pub fold_id: String,
    pub source_cluster: String,
    pub target_clusters: BTreeSet<String>,
    pub payload: OperationPayload,
    pub priority: u8,
    pub created_at: u64,
    pub completed_at: Option<u64>,
    pub status: OperationStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Data returned by the target, for reads.
    pub result: Option<Vec<u8>>,
    pub error: Option<String>,
}

impl CrossClusterOperation {
    pub fn new(
        operation_type: OperationKind,
        fold_id: impl Into<String>,
        source_cluster: impl Into<String>,
        target_cluster: impl Into<String>,
        payload: OperationPayload,
        priority: u8,
    ) -> Self {
        let mut target_clusters = BTreeSet::new();
        target_clusters.insert(target_cluster.into());
        Self {
            operation_id: Uuid::new_v4().to_string(),
            operation_type,
            fold_id: fold_id.into(),
            source_cluster: source_cluster.into(),
            target_clusters,
            payload,
            priority,
            created_at: now_millis(),
            completed_at: None,
            status: OperationStatus::Pending,
            retry_count: 0,
            result: None,
            error: None,
        }
    }

    pub fn complete(&mut self, result: Option<Vec<u8>>) {
        self.status = OperationStatus::Completed;
        self.result = result;
        self.error = None;
        self.completed_at = Some(now_millis());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now_millis());
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, OperationStatus::Completed | OperationStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_operation_is_pending() {
        let op = CrossClusterOperation::new(
            OperationKind::Store,
            "fold-1",
            "cluster-a",
            "cluster-b",
            OperationPayload::data(b"x".to_vec()).in_region("eu"),
            5,
        );
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.target_clusters.len(), 1);
        assert_eq!(op.payload.region.as_deref(), Some("eu"));
        assert!(!op.is_finished());
    }

    #[test]
    fn test_complete_and_fail_stamp_completion() {
        let mut op = CrossClusterOperation::new(
            OperationKind::Retrieve,
            "fold-1",
            "a",
            "b",
            OperationPayload::default(),
            0,
        );
        op.fail("unreachable");
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.completed_at.is_some());

        op.complete(Some(b"data".to_vec()));
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.error, None);
        assert_eq!(op.result.as_deref(), Some(&b"data"[..]));
    }
}
