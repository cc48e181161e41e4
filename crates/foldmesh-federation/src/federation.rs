// Coordinator state and the work behind every federation façade call.
//
// INVARIANTS:
// 1. A cross-cluster operation makes at most `max_retries` attempts, retrying transport errors only
// 2. A timed-out operation is failed immediately and never retried
// 3. Every routed operation is archived exactly once, after it finishes
// 4. Locks are released before any cluster RPC is awaited

use std::sync::Arc;
use std::time::Instant;

use foldmesh_core::{now_millis, FederationConfig, FoldMeshError};
use foldmesh_node::metrics::BoundedHistory;
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::backend::MemoryBackend;
use crate::balancer::{load_variance, plan_rebalance, LoadBalancer, Migration};
use crate::error::FederationError;
use crate::operation::{CrossClusterOperation, OperationKind, OperationPayload, OperationStatus};
use crate::registry::{ClusterRegistry, FederationCluster};
use crate::status::{FederationMetrics, FederationStatus, TopologyReport};
use crate::topology::{analyze, Action, Recommendation};
use crate::transport::{ClusterClient, ClusterTransport};

pub(crate) struct CoordinatorInner {
    pub(crate) config: FederationConfig,
    pub(crate) federation_id: RwLock<Option<String>>,
    pub(crate) registry: RwLock<ClusterRegistry>,
    pub(crate) balancer: Mutex<LoadBalancer>,
    pub(crate) backend: Arc<dyn MemoryBackend>,
    pub(crate) client: ClusterClient,
    pub(crate) metrics: Mutex<FederationMetrics>,
    history: Mutex<BoundedHistory<CrossClusterOperation>>,
    recommendations: Mutex<Vec<Recommendation>>,
}

impl CoordinatorInner {
    pub(crate) fn new(
        config: FederationConfig,
        backend: Arc<dyn MemoryBackend>,
        transport: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            registry: RwLock::new(ClusterRegistry::new(config.max_clusters)),
            balancer: Mutex::new(LoadBalancer::from_config(&config)),
            federation_id: RwLock::new(None),
            backend,
            client: ClusterClient::new(transport),
            metrics: Mutex::new(FederationMetrics::default()),
            history: Mutex::new(BoundedHistory::new()),
            recommendations: Mutex::new(Vec::new()),
            config,
        }
    }

    pub(crate) fn cluster_id(&self) -> &str {
        &self.config.cluster_id
    }

    pub(crate) fn federation_id(&self) -> Option<String> {
        self.federation_id.read().clone()
    }

    /// This cluster as other coordinators should see it right now.
    pub(crate) fn local_cluster(&self) -> FederationCluster {
        let mut cluster = FederationCluster::new(
            self.config.cluster_id.clone(),
            self.backend.coordinator_node(),
            self.config.endpoint(),
            self.config.region.clone(),
        )
        .with_members(self.backend.members())
        .with_load(self.backend.load_factor());
        cluster.refresh_health(now_millis(), self.config.cluster_heartbeat_timeout_ms);
        cluster
    }

    // ─────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────

    pub(crate) async fn route(
        &self,
        kind: OperationKind,
        fold_id: &str,
        payload: OperationPayload,
        priority: u8,
    ) -> Result<CrossClusterOperation, FederationError> {
        if self.federation_id().is_none() {
            return Err(FederationError::NotFederated);
        }
        let clusters = self.registry.read().ordered();
        let target = self
            .balancer
            .lock()
            .select(&clusters, kind, payload.region.as_deref())
            .ok_or_else(|| FederationError::NoEligibleCluster(format!("{kind} {fold_id}")))?;

        let mut operation = CrossClusterOperation::new(kind, fold_id, self.cluster_id(), target.clone(), payload, priority);
        self.metrics.lock().routed += 1;
        debug!(
            "[FederationCoordinator] routing {} {} -> {} ({})",
            kind, fold_id, target, operation.operation_id
        );

        self.execute(&mut operation, &target).await;
        self.archive(operation.clone());
        Ok(operation)
    }

    async fn execute(&self, operation: &mut CrossClusterOperation, target: &str) {
        let timeout = self.config.operation_timeout();
        loop {
            operation.status = OperationStatus::Executing;
            let started = Instant::now();
            let attempt = tokio::time::timeout(timeout, self.dispatch(operation, target)).await;
            match attempt {
                Ok(Ok(data)) => {
                    operation.complete(data);
                    self.metrics.lock().completed += 1;
                    info!(
                        "[FederationCoordinator] {} {} completed on {}",
                        operation.operation_type, operation.fold_id, target
                    );
                    return;
                }
                Ok(Err(err)) if err.is_transient() => {
                    operation.retry_count += 1;
                    if operation.retry_count >= self.config.max_retries {
                        let exhausted = FoldMeshError::RetryExhausted {
                            operation_id: operation.operation_id.clone(),
                            attempts: operation.retry_count,
                        };
                        warn!("[FederationCoordinator] {} (last error: {})", exhausted, err);
                        operation.fail(exhausted.to_string());
                        self.metrics.lock().failed += 1;
                        return;
                    }
                    debug!(
                        "[FederationCoordinator] attempt {} of {} failed: {}",
                        operation.retry_count, operation.operation_id, err
                    );
                    self.metrics.lock().retries += 1;
                }
                Ok(Err(err)) => {
                    warn!("[FederationCoordinator] {} failed on {}: {}", operation.operation_id, target, err);
                    operation.fail(err.to_string());
                    self.metrics.lock().failed += 1;
                    return;
                }
                Err(_) => {
                    let err = FederationError::OperationTimeout {
                        operation_id: operation.operation_id.clone(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    warn!("[FederationCoordinator] {}", err);
                    operation.fail(err.to_string());
                    let mut metrics = self.metrics.lock();
                    metrics.timeouts += 1;
                    metrics.failed += 1;
                    return;
                }
            }
        }
    }

    async fn dispatch(&self, operation: &CrossClusterOperation, target: &str) -> Result<Option<Vec<u8>>, FederationError> {
        if target == self.cluster_id() {
            return self.backend.execute(operation).await;
        }
        let endpoint = self.registry.read().get(target).map(|c| c.endpoint.clone());
        let endpoint = endpoint.ok_or_else(|| FederationError::ClusterNotFound(target.to_string()))?;
        let reply = self
            .client
            .propagate_cross_cluster_op(&endpoint, operation.clone())
            .await?;
        if reply.success {
            Ok(reply.data)
        } else {
            Err(FederationError::Rejected(
                reply.message.unwrap_or_else(|| format!("cluster {} refused the operation", reply.cluster_id)),
            ))
        }
    }

    fn archive(&self, operation: CrossClusterOperation) {
        let mut history = self.history.lock();
        history.push(operation);
        history.trim(self.config.history_limit);
    }

    // ─────────────────────────────────────────────
    // Load and topology
    // ─────────────────────────────────────────────

    pub(crate) fn balance(&self) -> Vec<Migration> {
        let loads = self.registry.read().loads();
        let plan = plan_rebalance(&loads, self.config.rebalance_margin, self.config.migration_fraction);
        if plan.is_empty() {
            debug!("[FederationCoordinator] load within margin, nothing to migrate");
            return plan;
        }
        {
            let mut registry = self.registry.write();
            for migration in &plan {
                registry.shift_load(&migration.from_cluster, &migration.to_cluster, migration.amount);
                info!(
                    "[FederationCoordinator] migrating {:.3} load {} -> {}",
                    migration.amount, migration.from_cluster, migration.to_cluster
                );
            }
        }
        let mut metrics = self.metrics.lock();
        metrics.rebalances += 1;
        metrics.migrations += plan.len() as u64;
        plan
    }

    pub(crate) fn optimize(&self) -> TopologyReport {
        let clusters = self.registry.read().ordered();
        let (applied, surfaced): (Vec<Recommendation>, Vec<Recommendation>) = analyze(
            &clusters,
            self.config.variance_threshold,
            self.config.isolation_threshold,
        )
        .into_iter()
        .partition(Recommendation::is_low_risk);

        let mut migrations = Vec::new();
        for recommendation in &applied {
            if let Action::Rebalance { .. } = recommendation.action {
                migrations.extend(self.balance());
            }
        }
        for recommendation in &surfaced {
            warn!("[FederationCoordinator] needs operator review: {}", recommendation.reason);
        }

        *self.recommendations.lock() = surfaced.clone();
        self.metrics.lock().topology_passes += 1;
        TopologyReport { applied, surfaced, migrations }
    }

    /// Refresh the local entry, heartbeat every remote cluster and rescore health.
    pub(crate) async fn health_tick(&self) {
        let local = self.local_cluster();
        let members: Vec<String> = local.member_nodes.iter().cloned().collect();
        let remotes: Vec<(String, String)> = {
            let mut registry = self.registry.write();
            registry.record_heartbeat(&local.cluster_id, local.load_factor, &members, now_millis());
            registry
                .ordered()
                .into_iter()
                .filter(|c| c.cluster_id != local.cluster_id)
                .map(|c| (c.cluster_id, c.endpoint))
                .collect()
        };

        let beats = join_all(remotes.iter().map(|(cluster_id, endpoint)| async move {
            (cluster_id, self.client.cluster_heartbeat(endpoint).await)
        }))
        .await;

        let mut registry = self.registry.write();
        for (cluster_id, beat) in beats {
            match beat {
                Ok(beat) => {
                    registry.record_heartbeat(cluster_id, beat.load_factor, &beat.members, now_millis());
                }
                Err(err) => debug!("[FederationCoordinator] cluster {} missed heartbeat: {}", cluster_id, err),
            }
        }
        registry.refresh_health(now_millis(), self.config.cluster_heartbeat_timeout_ms);
    }

    pub(crate) fn status(&self) -> FederationStatus {
        let clusters = self.registry.read().ordered();
        let loads: Vec<f64> = clusters.iter().map(|c| c.load_factor).collect();
        let mean_load = if loads.is_empty() {
            0.0
        } else {
            loads.iter().sum::<f64>() / loads.len() as f64
        };
        FederationStatus {
            federation_id: self.federation_id(),
            cluster_id: self.cluster_id().to_string(),
            strategy: self.balancer.lock().strategy(),
            load_variance: load_variance(&loads),
            mean_load,
            clusters,
            recommendations: self.recommendations.lock().clone(),
            recent_operations: self.history.lock().entries(),
            metrics: *self.metrics.lock(),
        }
    }
}
