use foldmesh_core::FoldMeshError;
use foldmesh_node::NodeError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FederationError {
    /// Shared taxonomy, including `CapacityExceeded` and `RetryExhausted`.
    #[error(transparent)]
    Core(#[from] FoldMeshError),

    #[error("cluster {0} is not registered")]
    ClusterNotFound(String),

    #[error("no cluster eligible for {0}")]
    NoEligibleCluster(String),

    #[error("cluster endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("cross-cluster operation {operation_id} timed out after {elapsed_ms} ms")]
    OperationTimeout { operation_id: String, elapsed_ms: u64 },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("message codec error: {0}")]
    Codec(String),

    #[error("coordinator is not part of a federation")]
    NotFederated,

    #[error("coordinator already belongs to federation {0}")]
    AlreadyFederated(String),
}

impl FederationError {
    /// Transport-level failures are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, FederationError::Unreachable { .. })
    }
}

impl From<NodeError> for FederationError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Core(core) => FederationError::Core(core),
            other => FederationError::Backend(other.to_string()),
        }
    }
}

impl From<bincode::Error> for FederationError {
    fn from(err: bincode::Error) -> Self {
        FederationError::Codec(err.to_string())
    }
}
