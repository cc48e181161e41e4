use foldmesh_core::{FoldMeshError, NodeState};
use foldmesh_p2p::PeerError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error(transparent)]
    Core(#[from] FoldMeshError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("node is {0} and does not accept writes")]
    NotAccepting(NodeState),
}

impl NodeError {
    pub fn not_found(fold_id: &str) -> Self {
        NodeError::Core(FoldMeshError::FoldNotFound(fold_id.to_string()))
    }
}
