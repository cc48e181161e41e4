// Configuration surface for nodes, consensus, replication and federation.
//
// Loaded from an optional TOML file and then `FOLDMESH__SECTION__FIELD`
// environment variables. Every field has a default, so an empty source is valid.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FoldMeshError;

// ─────────────────────────────────────────────
// Strategy enumerations
// ─────────────────────────────────────────────

/// Vote-counting policy used by the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusProtocol {
    SimpleMajority,
    /// Placeholder: counts like `SimpleMajority` until a 3f+1 quorum lands.
    ByzantineFaultTolerant,
    EventualConsistency,
    StrongConsistency,
}

impl ConsensusProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusProtocol::SimpleMajority => "SIMPLE_MAJORITY",
            ConsensusProtocol::ByzantineFaultTolerant => "BYZANTINE_FAULT_TOLERANT",
            ConsensusProtocol::EventualConsistency => "EVENTUAL_CONSISTENCY",
            ConsensusProtocol::StrongConsistency => "STRONG_CONSISTENCY",
        }
    }
}

/// Replica placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationStrategy {
    None,
    Mirror,
    Quorum,
    FullMesh,
    Ring,
}

/// Cluster selection policy for cross-cluster routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastLoaded,
    Geographic,
    SmartRouting,
    Adaptive,
}

// ─────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: String,
    pub address: String,
    pub port: u16,
    pub capacity: u64,
    /// Endpoints (`address:port`) contacted during peer discovery.
    pub seeds: Vec<String>,
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is marked OFFLINE.
    pub heartbeat_timeout_ms: u64,
    pub sync_interval_ms: u64,
    pub consensus_cleanup_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    /// Cap on every bounded history kept by the node.
    pub history_limit: usize,
    pub max_retries: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: "node-0".to_string(),
            address: "127.0.0.1".to_string(),
            port: 7400,
            capacity: 10_000,
            seeds: Vec::new(),
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            sync_interval_ms: 250,
            consensus_cleanup_interval_ms: 5_000,
            cleanup_interval_ms: 3_600_000,
            history_limit: 1_000,
            max_retries: 3,
        }
    }
}

impl NodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn consensus_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.consensus_cleanup_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub protocol: ConsensusProtocol,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Results older than this are evicted regardless of outcome.
    pub result_ttl_ms: u64,
    /// Whether the proposing node casts an approval for its own operation.
    /// Protocols whose threshold includes the proposer always count it.
    pub count_local_vote: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            protocol: ConsensusProtocol::SimpleMajority,
            timeout_ms: 5_000,
            poll_interval_ms: 25,
            result_ttl_ms: 60_000,
            count_local_vote: false,
        }
    }
}

impl ConsensusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub strategy: ReplicationStrategy,
    /// Successors chosen by `RING` placement.
    pub ring_replicas: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            strategy: ReplicationStrategy::Quorum,
            ring_replicas: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub cluster_id: String,
    pub region: String,
    pub address: String,
    pub port: u16,
    pub max_clusters: usize,
    pub strategy: LoadBalancingStrategy,
    pub max_utilization: f64,
    /// Load variance above which `ADAPTIVE` switches to `LEAST_LOADED`.
    pub variance_threshold: f64,
    /// Distance from the mean load that marks a cluster over/under loaded.
    pub rebalance_margin: f64,
    /// Share of the imbalance moved per migration.
    pub migration_fraction: f64,
    pub health_check_interval_ms: u64,
    pub rebalance_interval_ms: u64,
    pub topology_interval_ms: u64,
    /// Heartbeat age at which heartbeat recency reaches zero.
    pub cluster_heartbeat_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub max_retries: u32,
    /// Clusters below this health score are recommended for isolation.
    pub isolation_threshold: f64,
    pub history_limit: usize,
}

impl Default for FederationConfig {
    fn default() -> Self {
        FederationConfig {
            cluster_id: "cluster-0".to_string(),
            region: "default".to_string(),
            address: "127.0.0.1".to_string(),
            port: 7500,
            max_clusters: 16,
            strategy: LoadBalancingStrategy::Adaptive,
            max_utilization: 0.8,
            variance_threshold: 0.1,
            rebalance_margin: 0.2,
            migration_fraction: 0.5,
            health_check_interval_ms: 30_000,
            rebalance_interval_ms: 60_000,
            topology_interval_ms: 300_000,
            cluster_heartbeat_timeout_ms: 90_000,
            operation_timeout_ms: 10_000,
            max_retries: 3,
            isolation_threshold: 0.3,
            history_limit: 1_000,
        }
    }
}

impl FederationConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    pub fn topology_interval(&self) -> Duration {
        Duration::from_millis(self.topology_interval_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

// ─────────────────────────────────────────────
// FoldMeshConfig
// ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldMeshConfig {
    pub node: NodeConfig,
    pub consensus: ConsensusConfig,
    pub replication: ReplicationConfig,
    pub federation: FederationConfig,
}

impl FoldMeshConfig {
    /// Load configuration from an optional TOML file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, FoldMeshError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("FOLDMESH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let cfg: FoldMeshConfig = settings.try_deserialize()?;
        cfg.validate()?;
        debug!(
            "[Config] loaded node {} (file: {})",
            cfg.node.node_id,
            path.map(|p| p.display().to_string()).unwrap_or_else(|| "none".into())
        );
        Ok(cfg)
    }

    /// Parse configuration from TOML text (no environment overlay).
    pub fn from_toml_str(text: &str) -> Result<Self, FoldMeshError> {
        let cfg: FoldMeshConfig = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), FoldMeshError> {
        if self.node.node_id.is_empty() {
            return Err(FoldMeshError::Config("node.node_id must not be empty".into()));
        }
        if self.node.max_retries == 0 || self.federation.max_retries == 0 {
            return Err(FoldMeshError::Config("max_retries must be > 0".into()));
        }
        if self.node.heartbeat_timeout_ms < self.node.heartbeat_interval_ms {
            return Err(FoldMeshError::Config(
                "node.heartbeat_timeout_ms must be >= node.heartbeat_interval_ms".into(),
            ));
        }
        let f = &self.federation;
        for (name, value) in [
            ("federation.max_utilization", f.max_utilization),
            ("federation.migration_fraction", f.migration_fraction),
            ("federation.isolation_threshold", f.isolation_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FoldMeshError::Config(format!("{name} must be within [0, 1]")));
            }
        }
        if f.operation_timeout_ms <= self.consensus.timeout_ms {
            return Err(FoldMeshError::Config(
                "federation.operation_timeout_ms must exceed consensus.timeout_ms".into(),
            ));
        }
        if f.max_clusters == 0 {
            return Err(FoldMeshError::Config("federation.max_clusters must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_thresholds() {
        let cfg = FoldMeshConfig::default();
        assert_eq!(cfg.node.heartbeat_interval_ms, 10_000);
        assert_eq!(cfg.node.heartbeat_timeout_ms, 30_000);
        assert_eq!(cfg.node.max_retries, 3);
        assert_eq!(cfg.consensus.timeout_ms, 5_000);
        assert_eq!(cfg.consensus.result_ttl_ms, 60_000);
        assert_eq!(cfg.federation.max_utilization, 0.8);
        assert_eq!(cfg.federation.health_check_interval_ms, 30_000);
        assert_eq!(cfg.federation.rebalance_interval_ms, 60_000);
        assert_eq!(cfg.federation.operation_timeout_ms, 10_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_toml_overrides() {
        let cfg = FoldMeshConfig::from_toml_str(
            r#"
            [node]
            node_id = "alpha"
            port = 9000

            [consensus]
            protocol = "STRONG_CONSISTENCY"

            [replication]
            strategy = "RING"

            [federation]
            strategy = "ROUND_ROBIN"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.node.node_id, "alpha");
        assert_eq!(cfg.node.port, 9000);
        assert_eq!(cfg.node.heartbeat_interval_ms, 10_000);
        assert_eq!(cfg.consensus.protocol, ConsensusProtocol::StrongConsistency);
        assert_eq!(cfg.replication.strategy, ReplicationStrategy::Ring);
        assert_eq!(cfg.federation.strategy, LoadBalancingStrategy::RoundRobin);
    }

    #[test]
    fn test_sample_file_matches_defaults() {
        let cfg = FoldMeshConfig::from_toml_str(include_str!("../../../foldmesh.toml")).unwrap();
        let defaults = FoldMeshConfig::default();
        assert_eq!(cfg.consensus, defaults.consensus);
        assert_eq!(cfg.replication, defaults.replication);
        assert_eq!(cfg.node.heartbeat_timeout_ms, defaults.node.heartbeat_timeout_ms);
        assert_eq!(cfg.federation.strategy, defaults.federation.strategy);
        assert_eq!(cfg.federation.max_clusters, defaults.federation.max_clusters);
        assert_eq!(cfg.federation.operation_timeout_ms, defaults.federation.operation_timeout_ms);
    }

    #[test]
    fn test_validation_rejects_federation_timeout_within_consensus_wait() {
        let mut cfg = FoldMeshConfig::default();
        cfg.federation.operation_timeout_ms = cfg.consensus.timeout_ms;
        assert!(matches!(cfg.validate(), Err(FoldMeshError::Config(msg)) if msg.contains("operation_timeout_ms")));

        cfg.consensus.timeout_ms = 1_000;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_utilization() {
        let mut cfg = FoldMeshConfig::default();
        cfg.federation.max_utilization = 1.5;
        assert!(matches!(cfg.validate(), Err(FoldMeshError::Config(_))));
    }
}
