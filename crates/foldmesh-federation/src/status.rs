use foldmesh_core::LoadBalancingStrategy;
use serde::{Deserialize, Serialize};

use crate::balancer::Migration;
use crate::operation::CrossClusterOperation;
use crate::registry::FederationCluster;
use crate::topology::Recommendation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationMetrics {
    pub routed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub rebalances: u64,
    pub migrations: u64,
    pub topology_passes: u64,
    pub joins_accepted: u64,
    pub joins_rejected: u64,
}

/// Result of one `optimize_federation_topology` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    /// Low-risk recommendations that were acted on.
    pub applied: Vec<Recommendation>,
    /// High-risk recommendations left for an operator.
    pub surfaced: Vec<Recommendation>,
    pub migrations: Vec<Migration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationStatus {
    pub federation_id: Option<String>,
    pub cluster_id: String,
    pub strategy: LoadBalancingStrategy,
    pub clusters: Vec<FederationCluster>,
    pub mean_load: f64,
    pub load_variance: f64,
    pub recommendations: Vec<Recommendation>,
    pub recent_operations: Vec<CrossClusterOperation>,
    pub metrics: FederationMetrics,
}

impl FederationStatus {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
