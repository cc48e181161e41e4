use std::sync::{Arc, Weak};

use async_trait::async_trait;
use foldmesh_core::{Fold, FoldDigest, NodeInfo};

use crate::error::PeerError;
use crate::message::{PeerRequest, PeerResponse, Vote, VoteDecision, VoteProposal};

/// Server side of the peer RPC surface. Implemented by every node.
#[async_trait]
pub trait PeerService: Send + Sync {
    async fn handle(&self, request: PeerRequest) -> Result<PeerResponse, PeerError>;
}

/// Client side: delivers a request to whatever service listens on `endpoint`.
///
/// Services are registered by weak reference so a transport never keeps a
/// stopped node alive.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn register(&self, endpoint: &str, service: Weak<dyn PeerService>) -> Result<(), PeerError>;

    async fn deregister(&self, endpoint: &str);

    async fn send(&self, endpoint: &str, request: PeerRequest) -> Result<PeerResponse, PeerError>;
}

/// Typed wrapper over a [`PeerTransport`], one method per RPC.
#[derive(Clone)]
pub struct PeerClient {
    transport: Arc<dyn PeerTransport>,
}

fn unexpected(request: &'static str, response: PeerResponse) -> PeerError {
    PeerError::UnexpectedResponse {
        request: request.to_string(),
        response: response.name().to_string(),
    }
}

impl PeerClient {
    pub fn new(transport: Arc<dyn PeerTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub async fn heartbeat(&self, endpoint: &str, from: &str) -> Result<NodeInfo, PeerError> {
        let request = PeerRequest::Heartbeat { from: from.to_string() };
        match self.transport.send(endpoint, request).await? {
            PeerResponse::HeartbeatAck(info) => Ok(info),
            other => Err(unexpected("heartbeat", other)),
        }
    }

    pub async fn request_sync(
        &self,
        endpoint: &str,
        fold_id: &str,
        since_version: u64,
    ) -> Result<Option<Fold>, PeerError> {
        let request = PeerRequest::RequestSync {
            fold_id: fold_id.to_string(),
            since_version,
        };
        match self.transport.send(endpoint, request).await? {
            PeerResponse::Fold(fold) => Ok(fold),
            other => Err(unexpected("request_sync", other)),
        }
    }

    pub async fn vote(&self, endpoint: &str, vote: Vote) -> Result<(), PeerError> {
        match self.transport.send(endpoint, PeerRequest::Vote(vote)).await? {
            PeerResponse::Ack => Ok(()),
            other => Err(unexpected("vote", other)),
        }
    }

    pub async fn request_vote(&self, endpoint: &str, proposal: VoteProposal) -> Result<VoteDecision, PeerError> {
        match self.transport.send(endpoint, PeerRequest::RequestVote(proposal)).await? {
            PeerResponse::VoteCast(decision) => Ok(decision),
            other => Err(unexpected("request_vote", other)),
        }
    }

    pub async fn get_fold(&self, endpoint: &str, fold_id: &str) -> Result<Option<Fold>, PeerError> {
        let request = PeerRequest::GetFold { fold_id: fold_id.to_string() };
        match self.transport.send(endpoint, request).await? {
            PeerResponse::Fold(fold) => Ok(fold),
            other => Err(unexpected("get_fold", other)),
        }
    }

    pub async fn put_fold(&self, endpoint: &str, fold: Fold) -> Result<(), PeerError> {
        let request = PeerRequest::PutFold {
            checksum: fold.checksum.clone(),
            fold,
        };
        match self.transport.send(endpoint, request).await? {
            PeerResponse::Ack => Ok(()),
            other => Err(unexpected("put_fold", other)),
        }
    }

    pub async fn delete_fold(&self, endpoint: &str, fold_id: &str, from: &str) -> Result<(), PeerError> {
        let request = PeerRequest::DeleteFold {
            fold_id: fold_id.to_string(),
            from: from.to_string(),
        };
        match self.transport.send(endpoint, request).await? {
            PeerResponse::Ack => Ok(()),
            other => Err(unexpected("delete_fold", other)),
        }
    }

    pub async fn inventory(&self, endpoint: &str) -> Result<Vec<FoldDigest>, PeerError> {
        match self.transport.send(endpoint, PeerRequest::Inventory).await? {
            PeerResponse::Inventory(digests) => Ok(digests),
            other => Err(unexpected("inventory", other)),
        }
    }

    /// Announce `info` to a peer; the peer answers with every node it knows.
    pub async fn introduce(&self, endpoint: &str, info: NodeInfo) -> Result<Vec<NodeInfo>, PeerError> {
        match self.transport.send(endpoint, PeerRequest::Introduce(info)).await? {
            PeerResponse::Peers(peers) => Ok(peers),
            other => Err(unexpected("introduce", other)),
        }
    }

    pub async fn shutdown_notice(&self, endpoint: &str, node_id: &str) -> Result<(), PeerError> {
        let request = PeerRequest::ShutdownNotice { node_id: node_id.to_string() };
        match self.transport.send(endpoint, request).await? {
            PeerResponse::Ack => Ok(()),
            other => Err(unexpected("shutdown_notice", other)),
        }
    }
}
