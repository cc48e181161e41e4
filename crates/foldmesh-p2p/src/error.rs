use foldmesh_core::FoldMeshError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("endpoint {0} already registered")]
    AddressInUse(String),

    #[error("message codec error: {0}")]
    Codec(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("checksum mismatch for fold {0}")]
    ChecksumMismatch(String),

    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse { request: String, response: String },
}

impl PeerError {
    /// Map a transport failure into the shared taxonomy for the given peer.
    pub fn into_fold_mesh(self, node_id: &str) -> FoldMeshError {
        match self {
            PeerError::ChecksumMismatch(fold_id) => FoldMeshError::ChecksumMismatch {
                fold_id,
                local: String::new(),
                remote: String::new(),
            },
            other => FoldMeshError::NodeUnreachable {
                node_id: node_id.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<bincode::Error> for PeerError {
    fn from(err: bincode::Error) -> Self {
        PeerError::Codec(err.to_string())
    }
}
