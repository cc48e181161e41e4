use foldmesh_core::{Fold, FoldDigest, NodeInfo, OperationType};
use serde::{Deserialize, Serialize};

use crate::error::PeerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteDecision {
    Approve,
    Reject,
}

impl VoteDecision {
    pub fn is_approve(self) -> bool {
        self == VoteDecision::Approve
    }
}

/// A cast vote, delivered to the node coordinating `operation_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub operation_id: String,
    pub voter: String,
    pub decision: VoteDecision,
}

/// Request for a peer's opinion on a pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteProposal {
    pub operation_id: String,
    pub operation_type: OperationType,
    pub fold_id: String,
    pub checksum: Option<String>,
    /// Timestamp of the proposed copy; zero for deletes.
    pub last_modified: u64,
    pub proposer: String,
}

/// Peer RPC surface, exposed and consumed symmetrically by every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerRequest {
    Heartbeat { from: String },
    RequestSync { fold_id: String, since_version: u64 },
    Vote(Vote),
    RequestVote(VoteProposal),
    GetFold { fold_id: String },
    PutFold { fold: Fold, checksum: String },
    DeleteFold { fold_id: String, from: String },
    Inventory,
    Introduce(NodeInfo),
    ShutdownNotice { node_id: String },
}

impl PeerRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PeerRequest::Heartbeat { .. } => "heartbeat",
            PeerRequest::RequestSync { .. } => "request_sync",
            PeerRequest::Vote(_) => "vote",
            PeerRequest::RequestVote(_) => "request_vote",
            PeerRequest::GetFold { .. } => "get_fold",
            PeerRequest::PutFold { .. } => "put_fold",
            PeerRequest::DeleteFold { .. } => "delete_fold",
            PeerRequest::Inventory => "inventory",
            PeerRequest::Introduce(_) => "introduce",
            PeerRequest::ShutdownNotice { .. } => "shutdown_notice",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerResponse {
    Ack,
    HeartbeatAck(NodeInfo),
    Fold(Option<Fold>),
    VoteCast(VoteDecision),
    Inventory(Vec<FoldDigest>),
    Peers(Vec<NodeInfo>),
}

impl PeerResponse {
    pub fn name(&self) -> &'static str {
        match self {
            PeerResponse::Ack => "ack",
            PeerResponse::HeartbeatAck(_) => "heartbeat_ack",
            PeerResponse::Fold(_) => "fold",
            PeerResponse::VoteCast(_) => "vote_cast",
            PeerResponse::Inventory(_) => "inventory",
            PeerResponse::Peers(_) => "peers",
        }
    }
}

pub fn encode_request(request: &PeerRequest) -> Result<Vec<u8>, PeerError> {
    Ok(bincode::serialize(request)?)
}

pub fn decode_request(bytes: &[u8]) -> Result<PeerRequest, PeerError> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_response(response: &PeerResponse) -> Result<Vec<u8>, PeerError> {
    Ok(bincode::serialize(response)?)
}

pub fn decode_response(bytes: &[u8]) -> Result<PeerResponse, PeerError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_fold_frame_preserves_payload() {
        let fold = Fold::with_timestamp("fold-7", vec![0u8, 1, 2, 255], 42);
        let request = PeerRequest::PutFold {
            checksum: fold.checksum.clone(),
            fold: fold.clone(),
        };
        let bytes = encode_request(&request).unwrap();
        match decode_request(&bytes).unwrap() {
            PeerRequest::PutFold { fold: decoded, checksum } => {
                assert_eq!(decoded, fold);
                assert_eq!(checksum, fold.checksum);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_is_codec_error() {
        let bytes = encode_request(&PeerRequest::Heartbeat { from: "node-a".into() }).unwrap();
        let err = decode_request(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, PeerError::Codec(_)));
    }
}
