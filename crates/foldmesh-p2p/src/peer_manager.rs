// Known-node table for one replication node.
//
// INVARIANTS:
// 1. The local node never appears in its own peer table
// 2. A peer is in the active set iff its state is ACTIVE or SYNCING
// 3. A peer silent for longer than the heartbeat timeout is OFFLINE on the next expiry pass

use std::collections::HashMap;

use foldmesh_core::{NodeInfo, NodeState};
use log::{info, warn};

/// Smoothing factor for latency and success moving averages.
const METRICS_ALPHA: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct PeerManager {
    local_id: String,
    peers: HashMap<String, NodeInfo>,
}

impl PeerManager {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            peers: HashMap::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Admit a peer into the active set, replacing any previous entry.
    ///
    /// Returns `false` when `info` describes the local node.
    pub fn admit(&mut self, mut info: NodeInfo, now: u64) -> bool {
        if info.node_id == self.local_id {
            return false;
        }
        info.state = NodeState::Active;
        info.last_heartbeat = now;
        info!("[PeerManager] admitted peer {} at {}", info.node_id, info.endpoint());
        self.peers.insert(info.node_id.clone(), info);
        true
    }

    /// Merge a peer learned second-hand (discovery).
    ///
    /// Unknown peers are admitted; known peers keep their local bookkeeping
    /// but adopt the advertised address.
    pub fn merge(&mut self, info: NodeInfo, now: u64) -> bool {
        if info.node_id == self.local_id {
            return false;
        }
        match self.peers.get_mut(&info.node_id) {
            Some(existing) => {
                existing.address = info.address;
                existing.port = info.port;
                existing.capabilities = info.capabilities;
                false
            }
            None => self.admit(info, now),
        }
    }

    /// Record a successful heartbeat exchange with `node_id`.
    ///
    /// An OFFLINE peer that answers again rejoins the active set.
    pub fn record_heartbeat(&mut self, node_id: &str, now: u64) -> bool {
        match self.peers.get_mut(node_id) {
            Some(peer) => {
                peer.last_heartbeat = now;
                if peer.state == NodeState::Offline {
                    info!("[PeerManager] peer {} is reachable again", node_id);
                    peer.state = NodeState::Active;
                }
                true
            }
            None => false,
        }
    }

    /// Refresh the advertised load/capacity of a peer from its heartbeat ack.
    pub fn refresh_from_ack(&mut self, ack: &NodeInfo) {
        if let Some(peer) = self.peers.get_mut(&ack.node_id) {
            peer.capacity = ack.capacity;
            peer.current_load = ack.current_load;
        }
    }

    /// Mark every active peer silent for longer than `timeout_ms` as OFFLINE.
    ///
    /// Returns the ids evicted from the active set by this pass.
    pub fn expire_stale(&mut self, now: u64, timeout_ms: u64) -> Vec<String> {
        let mut expired = Vec::new();
        for peer in self.peers.values_mut() {
            if peer.is_active() && now.saturating_sub(peer.last_heartbeat) > timeout_ms {
                peer.state = NodeState::Offline;
                expired.push(peer.node_id.clone());
            }
        }
        expired.sort();
        for node_id in &expired {
            warn!("[PeerManager] peer {} missed heartbeats for > {} ms; marked OFFLINE", node_id, timeout_ms);
        }
        expired
    }

    pub fn mark_offline(&mut self, node_id: &str) -> bool {
        match self.peers.get_mut(node_id) {
            Some(peer) => {
                peer.state = NodeState::Offline;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, node_id: &str) -> Option<NodeInfo> {
        self.peers.remove(node_id)
    }

    /// Fold an RPC outcome into the peer's latency, success and reputation.
    pub fn record_rpc(&mut self, node_id: &str, success: bool, elapsed_ms: f64) {
        if let Some(peer) = self.peers.get_mut(node_id) {
            let outcome = if success { 1.0 } else { 0.0 };
            peer.average_response_time = if peer.average_response_time == 0.0 {
                elapsed_ms
            } else {
                (1.0 - METRICS_ALPHA) * peer.average_response_time + METRICS_ALPHA * elapsed_ms
            };
            peer.success_rate = (1.0 - METRICS_ALPHA) * peer.success_rate + METRICS_ALPHA * outcome;
            peer.reputation = (0.9 * peer.reputation + 0.1 * outcome).clamp(0.0, 1.0);
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeInfo> {
        self.peers.get(node_id)
    }

    /// Active peers (excluding self), sorted by node id for stable placement.
    pub fn active_peers(&self) -> Vec<NodeInfo> {
        let mut peers: Vec<NodeInfo> = self.peers.values().filter(|p| p.is_active()).cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    pub fn active_peer_ids(&self) -> Vec<String> {
        self.active_peers().into_iter().map(|p| p.node_id).collect()
    }

    /// Size of the active set including the local node.
    pub fn active_count_including_self(&self) -> usize {
        self.peers.values().filter(|p| p.is_active()).count() + 1
    }

    /// Every known peer regardless of state, sorted by node id.
    pub fn all_peers(&self) -> Vec<NodeInfo> {
        let mut peers: Vec<NodeInfo> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    pub fn endpoint_of(&self, node_id: &str) -> Option<String> {
        self.peers.get(node_id).map(|p| p.endpoint())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
