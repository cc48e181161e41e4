//! Federation cluster registry.
//!
//! Tracks every known cluster: its coordinator, member set, region,
//! capabilities, reported load and derived health. Registration order is
//! preserved because `ROUND_ROBIN` routing cycles through it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use foldmesh_core::{now_millis, FoldMeshError, NodeCapability};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::FederationError;

// ─────────────────────────────────────────────
// Health scoring
// ─────────────────────────────────────────────

const RECENCY_WEIGHT: f64 = 0.4;
const LOAD_WEIGHT: f64 = 0.3;
const MEMBERSHIP_WEIGHT: f64 = 0.3;
/// Member count at which the membership term saturates.
const FULL_MEMBERSHIP: f64 = 3.0;

/// `0.4·recency + 0.3·(1 − load) + 0.3·min(1, members/3)`, each term in `[0, 1]`.
///
/// Recency falls linearly from 1 at `now` to 0 at `timeout_ms` of silence.
pub fn health_score(last_heartbeat: u64, now: u64, timeout_ms: u64, load_factor: f64, members: usize) -> f64 {
    let age = now.saturating_sub(last_heartbeat) as f64;
    let recency = if timeout_ms == 0 {
        0.0
    } else {
        (1.0 - age / timeout_ms as f64).clamp(0.0, 1.0)
    };
    let headroom = (1.0 - load_factor).clamp(0.0, 1.0);
    let membership = (members as f64 / FULL_MEMBERSHIP).clamp(0.0, 1.0);
    RECENCY_WEIGHT * recency + LOAD_WEIGHT * headroom + MEMBERSHIP_WEIGHT * membership
}

// ─────────────────────────────────────────────
// FederationCluster
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationCluster {
    pub cluster_id: String,
    pub coordinator_node: String,
    /// `address:port` of the cluster coordinator's RPC service.
    pub endpoint: String,
    pub member_nodes: BTreeSet<String>,
    pub region: String,
    pub capabilities: BTreeSet<NodeCapability>,
    pub load_factor: f64,
    pub health_score: f64,
    pub last_heartbeat: u64,
    pub metadata: BTreeMap<String, String>,
}

impl FederationCluster {
    pub fn new(
        cluster_id: impl Into<String>,
        coordinator_node: impl Into<String>,
        endpoint: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        let coordinator_node = coordinator_node.into();
        let mut member_nodes = BTreeSet::new();
        member_nodes.insert(coordinator_node.clone());
        Self {
            cluster_id: cluster_id.into(),
            coordinator_node,
            endpoint: endpoint.into(),
            member_nodes,
            region: region.into(),
            capabilities: NodeCapability::all(),
            load_factor: 0.0,
            health_score: 1.0,
            last_heartbeat: now_millis(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_load(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor.clamp(0.0, 1.0);
        self
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_nodes.extend(members.into_iter().map(Into::into));
        self
    }

    pub fn refresh_health(&mut self, now: u64, timeout_ms: u64) -> f64 {
        self.health_score = health_score(
            self.last_heartbeat,
            now,
            timeout_ms,
            self.load_factor,
            self.member_nodes.len(),
        );
        self.health_score
    }
}

// ─────────────────────────────────────────────
// ClusterRegistry
// ─────────────────────────────────────────────

/// Clusters keyed by id, iterated in registration order.
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    clusters: HashMap<String, FederationCluster>,
    order: Vec<String>,
    max_clusters: usize,
}

impl ClusterRegistry {
    pub fn new(max_clusters: usize) -> Self {
        Self {
            clusters: HashMap::new(),
            order: Vec::new(),
            max_clusters,
        }
    }

    /// Insert a new cluster or refresh a known one.
    ///
    /// A known cluster keeps its registration slot. A new cluster is refused
    /// once the registry holds `max_clusters`.
    pub fn register(&mut self, cluster: FederationCluster) -> Result<(), FederationError> {
        if let Some(existing) = self.clusters.get_mut(&cluster.cluster_id) {
            debug!("[ClusterRegistry] refreshed cluster {}", cluster.cluster_id);
            *existing = cluster;
            return Ok(());
        }
        if self.clusters.len() >= self.max_clusters {
            return Err(FoldMeshError::CapacityExceeded {
                current: self.clusters.len(),
                max: self.max_clusters,
            }
            .into());
        }
        info!(
            "[ClusterRegistry] registered cluster {} ({} members, region {})",
            cluster.cluster_id,
            cluster.member_nodes.len(),
            cluster.region
        );
        self.order.push(cluster.cluster_id.clone());
        self.clusters.insert(cluster.cluster_id.clone(), cluster);
        Ok(())
    }

    pub fn remove(&mut self, cluster_id: &str) -> Option<FederationCluster> {
        let removed = self.clusters.remove(cluster_id)?;
        self.order.retain(|id| id != cluster_id);
        info!("[ClusterRegistry] removed cluster {}", cluster_id);
        Some(removed)
    }

    pub fn get(&self, cluster_id: &str) -> Option<&FederationCluster> {
        self.clusters.get(cluster_id)
    }

    pub fn contains(&self, cluster_id: &str) -> bool {
        self.clusters.contains_key(cluster_id)
    }

    /// Clusters in registration order.
    pub fn ordered(&self) -> Vec<FederationCluster> {
        self.order
            .iter()
            .filter_map(|id| self.clusters.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn max_clusters(&self) -> usize {
        self.max_clusters
    }

    /// Apply a heartbeat report. Returns `false` for an unknown cluster.
    pub fn record_heartbeat(&mut self, cluster_id: &str, load_factor: f64, members: &[String], at: u64) -> bool {
        match self.clusters.get_mut(cluster_id) {
            Some(cluster) => {
                cluster.load_factor = load_factor.clamp(0.0, 1.0);
                if !members.is_empty() {
                    cluster.member_nodes = members.iter().cloned().collect();
                }
                cluster.last_heartbeat = cluster.last_heartbeat.max(at);
                true
            }
            None => false,
        }
    }

    pub fn set_load(&mut self, cluster_id: &str, load_factor: f64) -> bool {
        match self.clusters.get_mut(cluster_id) {
            Some(cluster) => {
                cluster.load_factor = load_factor.clamp(0.0, 1.0);
                true
            }
            None => false,
        }
    }

    /// Move `amount` of load from one cluster to another, clamped to `[0, 1]`.
    pub fn shift_load(&mut self, from: &str, to: &str, amount: f64) -> bool {
        if !self.clusters.contains_key(from) || !self.clusters.contains_key(to) {
            return false;
        }
        for (id, delta) in [(from, -amount), (to, amount)] {
            if let Some(cluster) = self.clusters.get_mut(id) {
                cluster.load_factor = (cluster.load_factor + delta).clamp(0.0, 1.0);
            }
        }
        true
    }

    /// Recompute every cluster's health score.
    pub fn refresh_health(&mut self, now: u64, timeout_ms: u64) {
        for cluster in self.clusters.values_mut() {
            cluster.refresh_health(now, timeout_ms);
        }
    }

    /// `(cluster_id, load_factor)` in registration order.
    pub fn loads(&self) -> Vec<(String, f64)> {
        self.order
            .iter()
            .filter_map(|id| self.clusters.get(id).map(|c| (id.clone(), c.load_factor)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: &str) -> FederationCluster {
        FederationCluster::new(id, format!("{id}-coord"), format!("10.0.0.1:{}", id.len()), "eu")
    }

    #[test]
    fn test_health_score_weights() {
        // Fresh heartbeat, idle, three members: full marks.
        assert!((health_score(1_000, 1_000, 90_000, 0.0, 3) - 1.0).abs() < 1e-9);
        // Silent past the timeout, saturated, one member.
        let score = health_score(0, 200_000, 90_000, 1.0, 1);
        assert!((score - 0.1).abs() < 1e-9);
        // Half way to the timeout, half loaded, six members.
        let score = health_score(0, 45_000, 90_000, 0.5, 6);
        assert!((score - (0.2 + 0.15 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_register_preserves_order_and_refreshes_in_place() {
        let mut registry = ClusterRegistry::new(4);
        registry.register(cluster("b")).unwrap();
        registry.register(cluster("a")).unwrap();
        registry.register(cluster("b").with_load(0.7)).unwrap();

        let ids: Vec<String> = registry.ordered().into_iter().map(|c| c.cluster_id).collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(registry.get("b").unwrap().load_factor, 0.7);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut registry = ClusterRegistry::new(2);
        registry.register(cluster("a")).unwrap();
        registry.register(cluster("b")).unwrap();
        let err = registry.register(cluster("c")).unwrap_err();
        assert_eq!(
            err,
            FederationError::Core(FoldMeshError::CapacityExceeded { current: 2, max: 2 })
        );
        // Refreshing a known cluster is still allowed at capacity.
        assert!(registry.register(cluster("a")).is_ok());
    }

    #[test]
    fn test_heartbeat_updates_members_and_load() {
        let mut registry = ClusterRegistry::new(4);
        registry.register(cluster("a")).unwrap();
        let members = vec!["n1".to_string(), "n2".to_string(), "n3".to_string()];
        assert!(registry.record_heartbeat("a", 1.4, &members, now_millis()));
        let a = registry.get("a").unwrap();
        assert_eq!(a.load_factor, 1.0);
        assert_eq!(a.member_nodes.len(), 3);
        assert!(!registry.record_heartbeat("zzz", 0.1, &members, 0));
    }

    #[test]
    fn test_remove_drops_order_slot() {
        let mut registry = ClusterRegistry::new(4);
        registry.register(cluster("a")).unwrap();
        registry.register(cluster("b")).unwrap();
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.loads(), vec![("b".to_string(), 0.0)]);
    }
}
