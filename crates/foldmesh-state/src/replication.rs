// Replica placement and the replication ledger.
//
// INVARIANTS:
// 1. `select` never returns the local node and never returns a peer twice
// 2. QUORUM selects exactly floor(N/2)+1 of N available peers (0 when N = 0)
// 3. RING placement is a pure function of (fold_id, sorted peer list)
// 4. Every record satisfies replication_factor == |replica_nodes| + 1

use std::collections::{BTreeSet, HashMap};

use foldmesh_core::{placement_hash, ReplicationConfig, ReplicationStrategy};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Outcome of a placement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub replicas: Vec<String>,
    /// A replicating strategy found no peers; the fold lives on this node only.
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplicationSelector {
    strategy: ReplicationStrategy,
    ring_replicas: usize,
}

impl ReplicationSelector {
    pub fn new(strategy: ReplicationStrategy, ring_replicas: usize) -> Self {
        Self { strategy, ring_replicas }
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.strategy, config.ring_replicas)
    }

    pub fn strategy(&self) -> ReplicationStrategy {
        self.strategy
    }

    /// Choose replica holders for `fold_id` among `available` peers (self excluded).
    pub fn select(&self, fold_id: &str, available: &[String]) -> Placement {
        let mut peers: Vec<String> = available.to_vec();
        peers.sort();
        peers.dedup();

        if self.strategy == ReplicationStrategy::None {
            return Placement { replicas: Vec::new(), degraded: false };
        }
        if peers.is_empty() {
            warn!("[Replication] no peers available for fold {}; storing locally only", fold_id);
            return Placement { replicas: Vec::new(), degraded: true };
        }

        let replicas = match self.strategy {
            ReplicationStrategy::None => Vec::new(),
            ReplicationStrategy::Mirror => peers.into_iter().take(1).collect(),
            ReplicationStrategy::Quorum => {
                let size = quorum_size(peers.len());
                peers.into_iter().take(size).collect()
            }
            ReplicationStrategy::FullMesh => peers,
            ReplicationStrategy::Ring => ring_slice(fold_id, &peers, self.ring_replicas),
        };
        debug!(
            "[Replication] fold {} -> {:?} ({:?})",
            fold_id, replicas, self.strategy
        );
        Placement { replicas, degraded: false }
    }
}

/// Majority of the available peers, not counting self.
pub fn quorum_size(available: usize) -> usize {
    if available == 0 {
        0
    } else {
        available / 2 + 1
    }
}

fn ring_slice(fold_id: &str, sorted_peers: &[String], replicas: usize) -> Vec<String> {
    let len = sorted_peers.len();
    let start = (placement_hash(fold_id) % len as u64) as usize;
    (0..replicas.min(len))
        .map(|offset| sorted_peers[(start + offset) % len].clone())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRecord {
    pub fold_id: String,
    pub primary_node: String,
    pub replica_nodes: BTreeSet<String>,
    pub replication_factor: usize,
    pub created_at: u64,
    pub last_verified: u64,
    pub checksum: String,
    pub version: u64,
}

impl ReplicationRecord {
    pub fn new(
        fold_id: impl Into<String>,
        primary_node: impl Into<String>,
        replicas: impl IntoIterator<Item = String>,
        checksum: impl Into<String>,
        now: u64,
    ) -> Self {
        let replica_nodes: BTreeSet<String> = replicas.into_iter().collect();
        Self {
            fold_id: fold_id.into(),
            primary_node: primary_node.into(),
            replication_factor: replica_nodes.len() + 1,
            replica_nodes,
            created_at: now,
            last_verified: now,
            checksum: checksum.into(),
            version: 1,
        }
    }

    pub fn set_replicas(&mut self, replicas: impl IntoIterator<Item = String>) {
        self.replica_nodes = replicas.into_iter().collect();
        self.replication_factor = self.replica_nodes.len() + 1;
    }

    pub fn add_replica(&mut self, node_id: &str) {
        if self.replica_nodes.insert(node_id.to_string()) {
            self.replication_factor = self.replica_nodes.len() + 1;
        }
    }
}

/// Fold id -> replication record, one ledger per node.
#[derive(Debug, Default, Clone)]
pub struct ReplicationLedger {
    records: HashMap<String, ReplicationRecord>,
}

impl ReplicationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed write: creates the record, or replaces its replica
    /// set and checksum and bumps the version.
    pub fn commit(
        &mut self,
        fold_id: &str,
        primary_node: &str,
        replicas: impl IntoIterator<Item = String>,
        checksum: &str,
        now: u64,
    ) -> ReplicationRecord {
        let record = match self.records.get_mut(fold_id) {
            Some(existing) => {
                existing.set_replicas(replicas);
                existing.checksum = checksum.to_string();
                existing.primary_node = primary_node.to_string();
                existing.last_verified = now;
                existing.version += 1;
                existing.clone()
            }
            None => {
                let record = ReplicationRecord::new(fold_id, primary_node, replicas, checksum, now);
                self.records.insert(fold_id.to_string(), record.clone());
                record
            }
        };
        debug!(
            "[Replication] record {} v{} factor {}",
            fold_id, record.version, record.replication_factor
        );
        record
    }

    /// Mark a record verified after a successful propagation to `replicas`.
    ///
    /// Returns `false` if no record exists for the fold.
    pub fn refresh(&mut self, fold_id: &str, replicas: &[String], checksum: &str, now: u64) -> bool {
        match self.records.get_mut(fold_id) {
            Some(record) => {
                for node_id in replicas {
                    record.add_replica(node_id);
                }
                record.checksum = checksum.to_string();
                record.last_verified = now;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, fold_id: &str) -> Option<&ReplicationRecord> {
        self.records.get(fold_id)
    }

    pub fn replicas_of(&self, fold_id: &str) -> Vec<String> {
        self.records
            .get(fold_id)
            .map(|r| r.replica_nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, fold_id: &str) -> Option<ReplicationRecord> {
        self.records.remove(fold_id)
    }

    /// Every record, sorted by fold id.
    pub fn records(&self) -> Vec<ReplicationRecord> {
        let mut all: Vec<ReplicationRecord> = self.records.values().cloned().collect();
        all.sort_by(|a, b| a.fold_id.cmp(&b.fold_id));
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
