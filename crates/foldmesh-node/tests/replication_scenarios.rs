use std::sync::Arc;
use std::time::Duration;

use foldmesh_core::{ConsensusProtocol, Fold, FoldMeshConfig, NodeState, ReplicationStrategy};
use foldmesh_node::{DistributedMemory, Durability, SyncStep};
use foldmesh_p2p::LocalNetwork;

const BASE_PORT: u16 = 9200;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn endpoint(index: usize) -> String {
    format!("127.0.0.1:{}", BASE_PORT + index as u16)
}

/// Loops are effectively disabled; tests drive ticks by hand.
fn config(index: usize) -> FoldMeshConfig {
    let mut config = FoldMeshConfig::default();
    config.node.node_id = format!("node-{index}");
    config.node.port = BASE_PORT + index as u16;
    if index > 0 {
        config.node.seeds = vec![endpoint(0)];
    }
    config.node.heartbeat_interval_ms = 3_600_000;
    config.node.sync_interval_ms = 3_600_000;
    config.consensus.timeout_ms = 300;
    config.consensus.poll_interval_ms = 5;
    config.replication.strategy = ReplicationStrategy::Quorum;
    config.consensus.protocol = ConsensusProtocol::SimpleMajority;
    config
}

async fn mesh_with(
    count: usize,
    tweak: impl Fn(usize, &mut FoldMeshConfig),
) -> (Arc<LocalNetwork>, Vec<DistributedMemory>) {
    init_logger();
    let network = Arc::new(LocalNetwork::new());
    let mut nodes = Vec::new();
    for index in 0..count {
        let mut config = config(index);
        tweak(index, &mut config);
        let node = DistributedMemory::new(config, network.clone());
        node.start().await.unwrap();
        nodes.push(node);
    }
    (network, nodes)
}

async fn mesh(count: usize) -> (Arc<LocalNetwork>, Vec<DistributedMemory>) {
    mesh_with(count, |_, _| {}).await
}

#[tokio::test]
async fn test_discovery_builds_full_mesh() {
    let (_network, nodes) = mesh(4).await;
    for node in &nodes {
        let status = node.get_network_status();
        assert_eq!(status.state, NodeState::Active);
        assert_eq!(status.active_peers.len(), 3, "{} peers", node.node_id());
    }
}

#[tokio::test]
async fn test_quorum_store_commits_with_all_peers_voting() {
    let (_network, nodes) = mesh(4).await;
    let outcome = nodes[0]
        .store(Fold::new("fold-a", b"payload".to_vec()), true, true)
        .await
        .unwrap();

    assert_eq!(outcome.durability, Durability::Committed);
    assert_eq!(outcome.replicas, vec!["node-1".to_string(), "node-2".to_string()]);
    let consensus = outcome.consensus.unwrap();
    assert!(consensus.consensus_reached);
    assert_eq!(consensus.required_votes, 3);

    let record = nodes[0].get_network_status().replication_records[0].clone();
    assert_eq!(record.replication_factor, 3);

    assert_eq!(nodes[0].drain_sync_queue(10).await, vec![SyncStep::Completed]);
    assert_eq!(nodes[1].retrieve("fold-a", true).await.unwrap().payload, b"payload");
    assert_eq!(nodes[2].retrieve("fold-a", true).await.unwrap().payload, b"payload");
}

#[tokio::test]
async fn test_two_confirmations_of_four_is_not_durable() {
    let (network, nodes) = mesh(4).await;
    network.partition(&endpoint(3));

    let outcome = nodes[0]
        .store(Fold::new("fold-a", b"payload".to_vec()), true, true)
        .await
        .unwrap();

    assert_eq!(outcome.replicas.len(), 2);
    assert_eq!(outcome.durability, Durability::NonDurable);
    assert!(!outcome.is_durable());
    assert!(!outcome.warnings.is_empty());
    let consensus = outcome.consensus.unwrap();
    assert_eq!(consensus.confirming_nodes.len(), 2);
    assert!(!consensus.consensus_reached);

    // The local write stands but no record exists, even after propagation.
    assert!(nodes[0].retrieve("fold-a", true).await.is_ok());
    nodes[0].drain_sync_queue(10).await;
    let status = nodes[0].get_network_status();
    assert!(status.replication_records.is_empty());
    assert_eq!(status.metrics.consensus_timeouts, 1);
}

#[tokio::test]
async fn test_silent_peer_leaves_active_set() {
    let (network, nodes) = mesh_with(4, |index, config| {
        if index == 0 {
            config.node.heartbeat_timeout_ms = 50;
        }
    })
    .await;
    network.partition(&endpoint(3));

    nodes[0].heartbeat_once().await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    nodes[0].heartbeat_once().await;

    let status = nodes[0].get_network_status();
    assert_eq!(status.active_peers, vec!["node-1".to_string(), "node-2".to_string()]);
    let silent = status.peers.iter().find(|p| p.node_id == "node-3").unwrap();
    assert_eq!(silent.state, NodeState::Offline);

    // Placement and thresholds now use three active nodes: 2 replicas, 2 votes.
    let outcome = nodes[0]
        .store(Fold::new("fold-b", b"x".to_vec()), true, true)
        .await
        .unwrap();
    assert_eq!(outcome.durability, Durability::Committed);
    assert_eq!(outcome.consensus.unwrap().required_votes, 2);
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let (_network, nodes) = mesh(2).await;
    nodes[0]
        .store(Fold::with_timestamp("f", b"old".to_vec(), 10), false, false)
        .await
        .unwrap();
    nodes[1]
        .store(Fold::with_timestamp("f", b"new".to_vec(), 20), false, false)
        .await
        .unwrap();
    nodes[1]
        .store(Fold::with_timestamp("g", b"mine".to_vec(), 50), false, false)
        .await
        .unwrap();
    nodes[0]
        .store(Fold::with_timestamp("g", b"stale".to_vec(), 40), false, false)
        .await
        .unwrap();

    let first = nodes[0].synchronize_with_network().await.unwrap();
    assert_eq!(first.mismatches, 2);
    assert_eq!(first.pulled, vec!["f".to_string(), "g".to_string()]);
    assert_eq!(nodes[0].retrieve("f", true).await.unwrap().payload, b"new");
    assert_eq!(nodes[0].state(), NodeState::Active);

    let second = nodes[0].synchronize_with_network().await.unwrap();
    assert_eq!(second.mismatches, 0);
    assert!(!second.changed_anything());
}

#[tokio::test]
async fn test_reconciliation_pushes_newer_local_copy() {
    let (_network, nodes) = mesh(2).await;
    nodes[0]
        .store(Fold::with_timestamp("f", b"newer".to_vec(), 30), false, false)
        .await
        .unwrap();
    nodes[1]
        .store(Fold::with_timestamp("f", b"older".to_vec(), 5), false, false)
        .await
        .unwrap();

    let report = nodes[0].synchronize_with_network().await.unwrap();
    assert_eq!(report.pushed, vec!["f".to_string()]);
    assert_eq!(nodes[1].retrieve("f", true).await.unwrap().payload, b"newer");
}

#[tokio::test]
async fn test_unreachable_replica_exhausts_retries() {
    let (network, nodes) = mesh(2).await;
    network.partition(&endpoint(1));

    let outcome = nodes[0]
        .store(Fold::new("f", b"x".to_vec()), true, false)
        .await
        .unwrap();
    assert_eq!(outcome.durability, Durability::Queued);

    let steps = nodes[0].drain_sync_queue(10).await;
    assert_eq!(
        steps,
        vec![
            SyncStep::Requeued { attempt: 2 },
            SyncStep::Requeued { attempt: 3 },
            SyncStep::Exhausted,
        ]
    );
    let status = nodes[0].get_network_status();
    assert_eq!(status.metrics.sync_failures, 1);
    assert_eq!(status.sync_queue.failed, 1);
    assert_eq!(nodes[0].pending_sync_operations(), 0);
}

#[tokio::test]
async fn test_queued_store_creates_record_on_sync() {
    let (_network, nodes) = mesh(3).await;
    nodes[0].store(Fold::new("f", b"x".to_vec()), true, false).await.unwrap();
    assert!(nodes[0].get_network_status().replication_records.is_empty());
    assert_eq!(nodes[0].process_sync_queue_once().await, Some(SyncStep::Completed));
    let records = nodes[0].get_network_status().replication_records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].replication_factor, 3);
}

#[tokio::test]
async fn test_delete_with_consensus_removes_everywhere() {
    let (_network, nodes) = mesh(3).await;
    nodes[0].store(Fold::new("f", b"x".to_vec()), true, true).await.unwrap();
    nodes[0].drain_sync_queue(10).await;
    assert!(nodes[1].retrieve("f", true).await.is_ok());

    let outcome = nodes[0].delete("f", true).await.unwrap();
    assert_eq!(outcome.durability, Durability::Committed);
    assert!(nodes[0].get_network_status().replication_records.is_empty());

    nodes[0].drain_sync_queue(10).await;
    for node in &nodes {
        assert!(node.retrieve("f", true).await.is_err());
    }
}

#[tokio::test]
async fn test_strong_consistency_commits_on_healthy_mesh() {
    let (_network, nodes) = mesh_with(3, |_, config| {
        config.consensus.protocol = ConsensusProtocol::StrongConsistency;
        config.replication.strategy = ReplicationStrategy::FullMesh;
    })
    .await;
    assert!(!FoldMeshConfig::default().consensus.count_local_vote);

    let outcome = nodes[0].store(Fold::new("f", b"all".to_vec()), true, true).await.unwrap();
    assert_eq!(outcome.durability, Durability::Committed);
    let consensus = outcome.consensus.unwrap();
    assert_eq!(consensus.required_votes, 3);
    assert_eq!(consensus.confirming_nodes.len(), 3);
    assert!(consensus.confirming_nodes.contains("node-0"));
}

#[tokio::test]
async fn test_strong_consistency_fails_on_newer_remote_copy() {
    let (_network, nodes) = mesh_with(3, |_, config| {
        config.consensus.protocol = ConsensusProtocol::StrongConsistency;
        config.consensus.timeout_ms = 2_000;
    })
    .await;
    nodes[1]
        .store(Fold::with_timestamp("f", b"future".to_vec(), u64::MAX / 2), false, false)
        .await
        .unwrap();

    let outcome = nodes[0].store(Fold::new("f", b"now".to_vec()), true, true).await.unwrap();
    assert_eq!(outcome.durability, Durability::NonDurable);
    let consensus = outcome.consensus.unwrap();
    assert!(consensus.rejecting_nodes.contains("node-1"));
    assert!(outcome.warnings[0].starts_with("consensus rejected"));
}

#[tokio::test]
async fn test_retrieve_falls_back_to_peers() {
    let (_network, nodes) = mesh(4).await;
    nodes[0].store(Fold::new("f", b"x".to_vec()), true, true).await.unwrap();
    nodes[0].drain_sync_queue(10).await;

    // node-3 is not a replica and holds no copy.
    let fold = nodes[3].retrieve("f", true).await.unwrap();
    assert_eq!(fold.payload, b"x");
}

#[tokio::test]
async fn test_update_bumps_record_version() {
    let (_network, nodes) = mesh(3).await;
    nodes[0].store(Fold::new("f", b"v1".to_vec()), true, true).await.unwrap();
    nodes[0].drain_sync_queue(10).await;

    let outcome = nodes[0].update("f", b"v2".to_vec(), true).await.unwrap();
    assert_eq!(outcome.durability, Durability::Committed);
    nodes[0].drain_sync_queue(10).await;

    assert_eq!(nodes[0].get_network_status().replication_records[0].version, 2);
    assert_eq!(nodes[1].retrieve("f", true).await.unwrap().payload, b"v2");
}

#[tokio::test]
async fn test_stop_notifies_peers() {
    let (_network, nodes) = mesh(3).await;
    nodes[2].stop().await.unwrap();
    assert_eq!(nodes[2].state(), NodeState::Offline);
    assert_eq!(nodes[0].get_network_status().active_peers, vec!["node-1".to_string()]);
}
