use foldmesh_consensus::{ConsensusResult, ConsensusStats};
use foldmesh_core::{NodeInfo, NodeState, OperationType};
use foldmesh_state::{ReplicationRecord, SyncOperation, SyncQueueStats};
use serde::{Deserialize, Serialize};

use crate::lifecycle::Transition;
use crate::metrics::{HistoryEntry, NodeMetrics};

/// How far a write got beyond the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Durability {
    /// Consensus committed and a replication record exists.
    Committed,
    /// Propagation queued without waiting for consensus.
    Queued,
    /// No replicas were selected; the fold exists on this node only.
    LocalOnly,
    /// Consensus timed out or rejected. The local write stands.
    NonDurable,
}

/// Result of `store`, `update` or `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub operation_id: Option<String>,
    pub operation_type: OperationType,
    pub fold_id: String,
    pub durability: Durability,
    pub replicas: Vec<String>,
    pub consensus: Option<ConsensusResult>,
    /// Confirmations relative to the consensus threshold, in `[0, 1]`.
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl WriteOutcome {
    /// A write that stays on this node and never entered the sync queue.
    pub(crate) fn local(operation_type: OperationType, fold_id: &str) -> Self {
        Self {
            operation_id: None,
            operation_type,
            fold_id: fold_id.to_string(),
            durability: Durability::LocalOnly,
            replicas: Vec::new(),
            consensus: None,
            confidence: 1.0,
            warnings: Vec::new(),
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.durability, Durability::Committed | Durability::Queued)
    }
}

/// Result of one `synchronize_with_network` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub peers_contacted: usize,
    pub peers_unreachable: Vec<String>,
    pub folds_compared: usize,
    pub mismatches: usize,
    /// Remote copies adopted locally.
    pub pulled: Vec<String>,
    /// Local copies pushed to a peer holding an older one.
    pub pushed: Vec<String>,
}

impl SyncReport {
    pub fn changed_anything(&self) -> bool {
        !self.pulled.is_empty() || !self.pushed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub node: NodeInfo,
    pub state: NodeState,
    pub peers: Vec<NodeInfo>,
    pub active_peers: Vec<String>,
    pub fold_count: usize,
    pub replication_records: Vec<ReplicationRecord>,
    pub pending_sync: Vec<SyncOperation>,
    pub sync_queue: SyncQueueStats,
    pub consensus_results: Vec<ConsensusResult>,
    pub consensus: ConsensusStats,
    pub metrics: NodeMetrics,
    pub recent_operations: Vec<HistoryEntry>,
    pub transitions: Vec<Transition>,
}

impl NetworkStatus {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Result of processing one queued sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStep {
    Completed,
    Requeued { attempt: u32 },
    Superseded,
    Exhausted,
}
