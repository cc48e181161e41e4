use foldmesh::demo::{run_demo, DemoOptions};
use foldmesh::federation::OperationStatus;
use foldmesh::node::Durability;
use foldmesh::FoldMeshConfig;

fn quiet_config() -> FoldMeshConfig {
    let mut config = FoldMeshConfig::default();
    config.node.port = 9600;
    config.federation.port = 9700;
    config.node.heartbeat_interval_ms = 3_600_000;
    config.node.heartbeat_timeout_ms = 3_600_000;
    config.consensus.timeout_ms = 1_000;
    config
}

#[tokio::test]
async fn test_demo_mesh_and_federation() {
    let _ = env_logger::builder().is_test(true).try_init();
    let options = DemoOptions { nodes: 3, clusters: 2, folds: 2 };
    let report = run_demo(&quiet_config(), options).await.unwrap();

    assert_eq!(report.nodes.len(), 3);
    assert!(report
        .writes
        .iter()
        .all(|w| w.durability == Durability::Committed));
    assert_eq!(report.routed.len(), 4);
    assert!(report
        .routed
        .iter()
        .all(|op| op.status == OperationStatus::Completed));

    let federation = report.federation.unwrap();
    assert_eq!(federation.clusters.len(), 2);
    assert_eq!(federation.metrics.routed, 4);
}

#[tokio::test]
async fn test_demo_without_federation() {
    let mut config = quiet_config();
    config.node.port = 9650;
    let report = run_demo(&config, DemoOptions { nodes: 1, clusters: 0, folds: 1 })
        .await
        .unwrap();
    assert!(report.federation.is_none());
    assert_eq!(report.writes[0].durability, Durability::LocalOnly);
}

#[tokio::test]
async fn test_demo_needs_a_node() {
    let result = run_demo(&quiet_config(), DemoOptions { nodes: 0, clusters: 1, folds: 1 }).await;
    assert!(result.is_err());
}
