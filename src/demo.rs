use std::sync::Arc;

use anyhow::{bail, Context, Result};
use foldmesh_core::{Fold, FoldMeshConfig};
use foldmesh_federation::{
    CrossClusterOperation, FederationCoordinator, FederationStatus, LocalClusterNetwork, Migration, NodeBackend,
    OperationKind, OperationPayload,
};
use foldmesh_node::{DistributedMemory, NetworkStatus, WriteOutcome};
use foldmesh_p2p::LocalNetwork;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct DemoOptions {
    pub nodes: usize,
    pub clusters: usize,
    pub folds: usize,
}

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub writes: Vec<WriteOutcome>,
    pub nodes: Vec<NetworkStatus>,
    pub routed: Vec<CrossClusterOperation>,
    pub migrations: Vec<Migration>,
    pub federation: Option<FederationStatus>,
}

fn node_config(base: &FoldMeshConfig, index: usize) -> Result<FoldMeshConfig> {
    let mut config = base.clone();
    let offset = u16::try_from(index).context("too many nodes")?;
    config.node.node_id = format!("{}-{}", base.node.node_id, index);
    config.node.port = base.node.port.checked_add(offset).context("node port out of range")?;
    config.node.seeds = if index == 0 {
        Vec::new()
    } else {
        vec![format!("{}:{}", base.node.address, base.node.port)]
    };
    Ok(config)
}

/// Boot `options.nodes` nodes and `options.clusters` coordinators in-process,
/// write sample folds, route sample operations and collect the snapshots.
pub async fn run_demo(base: &FoldMeshConfig, options: DemoOptions) -> Result<DemoReport> {
    if options.nodes == 0 {
        bail!("a demo needs at least one node");
    }
    base.validate().context("invalid base configuration")?;

    let peers = Arc::new(LocalNetwork::new());
    let mut nodes = Vec::with_capacity(options.nodes);
    for index in 0..options.nodes {
        let node = Arc::new(DistributedMemory::new(node_config(base, index)?, peers.clone()));
        node.start()
            .await
            .with_context(|| format!("starting node {index}"))?;
        nodes.push(node);
    }
    info!(nodes = nodes.len(), "mesh started");

    let mut writes = Vec::with_capacity(options.folds);
    for index in 0..options.folds {
        let node = &nodes[index % nodes.len()];
        let fold = Fold::new(format!("fold-{index}"), format!("payload {index}").into_bytes());
        let outcome = node.store(fold, true, true).await?;
        if !outcome.is_durable() && !outcome.warnings.is_empty() {
            warn!(fold = %outcome.fold_id, warnings = ?outcome.warnings, "write not durable");
        }
        writes.push(outcome);
    }
    for node in &nodes {
        node.drain_sync_queue(options.folds * 4 + 1).await;
    }

    let (routed, migrations, federation, coordinators) = if options.clusters > 0 {
        run_federation(base, &nodes, options).await?
    } else {
        (Vec::new(), Vec::new(), None, Vec::new())
    };

    let statuses = nodes.iter().map(|node| node.get_network_status()).collect();
    for coordinator in &coordinators {
        coordinator.shutdown().await;
    }
    for node in &nodes {
        node.stop().await?;
    }

    Ok(DemoReport {
        writes,
        nodes: statuses,
        routed,
        migrations,
        federation,
    })
}

type FederationRun = (
    Vec<CrossClusterOperation>,
    Vec<Migration>,
    Option<FederationStatus>,
    Vec<FederationCoordinator>,
);

async fn run_federation(
    base: &FoldMeshConfig,
    nodes: &[Arc<DistributedMemory>],
    options: DemoOptions,
) -> Result<FederationRun> {
    let network = Arc::new(LocalClusterNetwork::new());
    let mut coordinators = Vec::with_capacity(options.clusters);
    for index in 0..options.clusters {
        let mut config = base.federation.clone();
        let offset = u16::try_from(index).context("too many clusters")?;
        config.cluster_id = format!("{}-{}", base.federation.cluster_id, index);
        config.port = base.federation.port.checked_add(offset).context("cluster port out of range")?;
        let backend = Arc::new(NodeBackend::new(nodes[index % nodes.len()].clone()));
        let coordinator = FederationCoordinator::new(config, backend, network.clone());
        if index == 0 {
            coordinator.create_federation().await?;
        } else {
            coordinator
                .join_federation(&base.federation.address, base.federation.port)
                .await
                .with_context(|| format!("cluster {index} joining"))?;
        }
        coordinators.push(coordinator);
    }
    info!(clusters = coordinators.len(), "federation formed");

    let entry = &coordinators[0];
    let mut routed = Vec::new();
    for index in 0..options.folds.max(1) {
        let fold_id = format!("federated-{index}");
        let payload = OperationPayload::data(format!("routed {index}").into_bytes());
        routed.push(entry.route_memory_operation(OperationKind::Store, &fold_id, payload, 1).await?);
        routed.push(
            entry
                .route_memory_operation(OperationKind::Retrieve, &fold_id, OperationPayload::default(), 1)
                .await?,
        );
    }
    entry.health_check_once().await;
    let migrations = entry.balance_federation_load();
    let status = entry.get_federation_status();
    Ok((routed, migrations, Some(status), coordinators))
}
