//! Shared error taxonomy.
//!
//! Every variant is recovered by the loop or façade method that raises it and
//! reported through return values and metrics. None of them is fatal to a node.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldMeshError {
    /// A peer RPC failed. Retried per the sync/cross-cluster retry policy.
    #[error("node {node_id} unreachable: {reason}")]
    NodeUnreachable { node_id: String, reason: String },

    /// No consensus decision within the bound; the local write stands.
    #[error("consensus timeout for operation {operation_id} after {elapsed_ms} ms")]
    ConsensusTimeout { operation_id: String, elapsed_ms: u64 },

    /// Replicas disagree on a fold's content. Resolved by last-writer-wins.
    #[error("checksum mismatch for fold {fold_id}: local {local}, remote {remote}")]
    ChecksumMismatch { fold_id: String, local: String, remote: String },

    /// Federation is at `max_clusters`.
    #[error("federation capacity exceeded: {current}/{max} clusters")]
    CapacityExceeded { current: usize, max: usize },

    /// Operation abandoned after its final attempt.
    #[error("operation {operation_id} abandoned after {attempts} attempts")]
    RetryExhausted { operation_id: String, attempts: u32 },

    #[error("fold {0} not found")]
    FoldNotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid node transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for FoldMeshError {
    fn from(err: config::ConfigError) -> Self {
        FoldMeshError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FoldMeshError::CapacityExceeded { current: 16, max: 16 };
        assert_eq!(err.to_string(), "federation capacity exceeded: 16/16 clusters");

        let err = FoldMeshError::RetryExhausted {
            operation_id: "op-1".into(),
            attempts: 3,
        };
        assert!(err.to_string().contains("op-1"));
    }
}
