use async_trait::async_trait;
use foldmesh_core::{now_millis, Fold};
use foldmesh_p2p::{PeerError, PeerRequest, PeerResponse, PeerService, VoteDecision, VoteProposal};
use log::{debug, info};

use crate::node::NodeInner;

#[async_trait]
impl PeerService for NodeInner {
    async fn handle(&self, request: PeerRequest) -> Result<PeerResponse, PeerError> {
        match request {
            PeerRequest::Heartbeat { from } => {
                self.peers.write().record_heartbeat(&from, now_millis());
                Ok(PeerResponse::HeartbeatAck(self.local_info()))
            }
            // `since_version` is a last-modified watermark.
            PeerRequest::RequestSync { fold_id, since_version } => {
                let fold = self
                    .store
                    .read()
                    .get(&fold_id)
                    .filter(|fold| fold.last_modified > since_version)
                    .cloned();
                Ok(PeerResponse::Fold(fold))
            }
            PeerRequest::Vote(vote) => {
                let active = self.peers.read().active_count_including_self();
                self.consensus
                    .record_vote(&vote.operation_id, &vote.voter, vote.decision.is_approve(), active);
                Ok(PeerResponse::Ack)
            }
            PeerRequest::RequestVote(proposal) => Ok(PeerResponse::VoteCast(self.decide_vote(&proposal))),
            PeerRequest::GetFold { fold_id } => {
                let fold = self.store.read().get(&fold_id).cloned();
                Ok(PeerResponse::Fold(fold))
            }
            PeerRequest::PutFold { fold, checksum } => {
                self.accept_fold(fold, &checksum)?;
                Ok(PeerResponse::Ack)
            }
            PeerRequest::DeleteFold { fold_id, from } => {
                self.store.write().remove(&fold_id);
                self.ledger.lock().remove(&fold_id);
                debug!("[DistributedMemory] fold {} deleted at the request of {}", fold_id, from);
                Ok(PeerResponse::Ack)
            }
            PeerRequest::Inventory => Ok(PeerResponse::Inventory(self.store.read().inventory())),
            PeerRequest::Introduce(info) => {
                self.peers.write().admit(info, now_millis());
                let mut known = vec![self.local_info()];
                known.extend(self.peers.read().active_peers());
                Ok(PeerResponse::Peers(known))
            }
            PeerRequest::ShutdownNotice { node_id } => {
                if self.peers.write().mark_offline(&node_id) {
                    info!("[DistributedMemory] peer {} announced shutdown", node_id);
                }
                Ok(PeerResponse::Ack)
            }
        }
    }
}

impl NodeInner {
    /// Approve unless this node cannot take writes or holds a strictly newer copy.
    pub(crate) fn decide_vote(&self, proposal: &VoteProposal) -> VoteDecision {
        if !self.state().accepts_writes() {
            return VoteDecision::Reject;
        }
        let local = self.store.read().get(&proposal.fold_id).map(|fold| fold.last_modified);
        match local {
            Some(last_modified) if last_modified > proposal.last_modified => {
                debug!(
                    "[DistributedMemory] rejecting {} on {}: local copy is newer",
                    proposal.operation_id, proposal.fold_id
                );
                VoteDecision::Reject
            }
            _ => VoteDecision::Approve,
        }
    }

    fn accept_fold(&self, fold: Fold, checksum: &str) -> Result<(), PeerError> {
        if !self.state().accepts_writes() {
            return Err(PeerError::Rejected(format!("node {} is {}", self.node_id(), self.state())));
        }
        if fold.checksum != checksum || !fold.is_intact() {
            return Err(PeerError::ChecksumMismatch(fold.id));
        }
        self.adopt_if_newer(fold);
        Ok(())
    }
}
