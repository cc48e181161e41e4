use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::now_millis;

// ─────────────────────────────────────────────
// NodeState
// ─────────────────────────────────────────────

/// Lifecycle state of a replication node.
///
/// ```text
/// INITIALIZING → JOINING → ACTIVE ⇄ SYNCING
/// ACTIVE | SYNCING → OFFLINE
/// any → FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Initializing,
    Joining,
    Active,
    Syncing,
    Offline,
    Failed,
}

impl NodeState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        match (self, next) {
            (_, Failed) => true,
            (Initializing, Joining) => true,
            (Joining, Active) => true,
            (Active, Syncing) | (Syncing, Active) => true,
            (Active, Offline) | (Syncing, Offline) => true,
            _ => false,
        }
    }

    /// Nodes in these states take part in replication and voting.
    pub fn is_participating(self) -> bool {
        matches!(self, NodeState::Active | NodeState::Syncing)
    }

    /// Nodes in these states still accept local writes.
    pub fn accepts_writes(self) -> bool {
        !matches!(self, NodeState::Offline | NodeState::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Initializing => "INITIALIZING",
            NodeState::Joining => "JOINING",
            NodeState::Active => "ACTIVE",
            NodeState::Syncing => "SYNCING",
            NodeState::Offline => "OFFLINE",
            NodeState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────
// NodeCapability
// ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCapability {
    Storage,
    Replication,
    Consensus,
    Routing,
}

impl NodeCapability {
    pub fn all() -> BTreeSet<NodeCapability> {
        [
            NodeCapability::Storage,
            NodeCapability::Replication,
            NodeCapability::Consensus,
            NodeCapability::Routing,
        ]
        .into_iter()
        .collect()
    }
}

// ─────────────────────────────────────────────
// NodeInfo
// ─────────────────────────────────────────────

/// Identity and runtime metrics of one node, as known to its peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub state: NodeState,
    pub capabilities: BTreeSet<NodeCapability>,
    /// Unix milliseconds of the last successful heartbeat exchange.
    pub last_heartbeat: u64,
    /// Number of folds this node is willing to hold.
    pub capacity: u64,
    pub current_load: u64,
    /// Exponential moving average of RPC latency, milliseconds.
    pub average_response_time: f64,
    /// Exponential moving average of RPC success, in `[0, 1]`.
    pub success_rate: f64,
    pub reputation: f64,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        NodeInfo {
            node_id: node_id.into(),
            address: address.into(),
            port,
            state: NodeState::Initializing,
            capabilities: NodeCapability::all(),
            last_heartbeat: now_millis(),
            capacity: 10_000,
            current_load: 0,
            average_response_time: 0.0,
            success_rate: 1.0,
            reputation: 1.0,
        }
    }

    /// `address:port`, the key transports use to reach this node.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn is_active(&self) -> bool {
        self.state.is_participating()
    }

    /// Fraction of capacity in use, clamped to `[0, 1]`.
    pub fn load_factor(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        (self.current_load as f64 / self.capacity as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use NodeState::*;
        assert!(Initializing.can_transition_to(Joining));
        assert!(Joining.can_transition_to(Active));
        assert!(Active.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Active));
        assert!(Syncing.can_transition_to(Offline));
        assert!(Joining.can_transition_to(Failed));
        assert!(!Initializing.can_transition_to(Active));
        assert!(!Offline.can_transition_to(Active));
        assert!(!Joining.can_transition_to(Offline));
    }

    #[test]
    fn test_endpoint_and_load() {
        let mut node = NodeInfo::new("node-1", "127.0.0.1", 7400);
        assert_eq!(node.endpoint(), "127.0.0.1:7400");
        node.capacity = 4;
        node.current_load = 1;
        assert!((node.load_factor() - 0.25).abs() < f64::EPSILON);
        node.capacity = 0;
        assert_eq!(node.load_factor(), 1.0);
    }
}
