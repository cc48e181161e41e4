use std::sync::Arc;

use foldmesh_core::{FederationConfig, LoadBalancingStrategy, NodeCapability};
use foldmesh_node::lifecycle::spawn_supervised;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::MemoryBackend;
use crate::balancer::Migration;
use crate::error::FederationError;
use crate::federation::CoordinatorInner;
use crate::operation::{CrossClusterOperation, OperationKind, OperationPayload};
use crate::registry::FederationCluster;
use crate::status::{FederationStatus, TopologyReport};
use crate::transport::{ClusterService, ClusterTransport, JoinRequest};

struct Runtime {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Cluster-of-clusters façade.
///
/// One coordinator fronts one cluster. It creates or joins a federation,
/// keeps the cluster registry current, routes memory operations to the
/// best cluster and rebalances load between them.
pub struct FederationCoordinator {
    inner: Arc<CoordinatorInner>,
    runtime: Mutex<Option<Runtime>>,
}

impl FederationCoordinator {
    pub fn new(
        config: FederationConfig,
        backend: Arc<dyn MemoryBackend>,
        transport: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner::new(config, backend, transport)),
            runtime: Mutex::new(None),
        }
    }

    pub fn cluster_id(&self) -> &str {
        self.inner.cluster_id()
    }

    pub fn endpoint(&self) -> String {
        self.inner.config.endpoint()
    }

    pub fn federation_id(&self) -> Option<String> {
        self.inner.federation_id()
    }

    // ─────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────

    /// Start a new federation with this cluster as its first member.
    pub async fn create_federation(&self) -> Result<String, FederationError> {
        self.ensure_unfederated()?;
        self.bind().await?;
        let federation_id = Uuid::new_v4().to_string();
        let registered = self.inner.registry.write().register(self.inner.local_cluster());
        if let Err(err) = registered {
            self.unbind().await;
            return Err(err);
        }
        *self.inner.federation_id.write() = Some(federation_id.clone());
        self.spawn_loops();
        info!(
            "[FederationCoordinator] cluster {} created federation {}",
            self.cluster_id(),
            federation_id
        );
        Ok(federation_id)
    }

    /// Join the federation run by the coordinator at `address:port`.
    pub async fn join_federation(&self, address: &str, port: u16) -> Result<String, FederationError> {
        self.ensure_unfederated()?;
        self.bind().await?;
        match self.request_membership(&format!("{address}:{port}")).await {
            Ok(federation_id) => {
                *self.inner.federation_id.write() = Some(federation_id.clone());
                self.spawn_loops();
                info!(
                    "[FederationCoordinator] cluster {} joined federation {} via {}:{}",
                    self.cluster_id(),
                    federation_id,
                    address,
                    port
                );
                Ok(federation_id)
            }
            Err(err) => {
                warn!("[FederationCoordinator] join via {}:{} failed: {}", address, port, err);
                self.unbind().await;
                Err(err)
            }
        }
    }

    async fn request_membership(&self, endpoint: &str) -> Result<String, FederationError> {
        let request = JoinRequest {
            federation_id: None,
            cluster: self.inner.local_cluster(),
            capabilities: NodeCapability::all(),
        };
        let response = self.inner.client.join_request(endpoint, request).await?;
        if !response.accepted {
            return Err(FederationError::Rejected(
                response.reason.unwrap_or_else(|| "join refused".to_string()),
            ));
        }
        let federation_id = response
            .federation_id
            .ok_or_else(|| FederationError::Rejected("host returned no federation id".to_string()))?;

        let mut registry = self.inner.registry.write();
        registry.register(self.inner.local_cluster())?;
        for cluster in response.topology {
            if cluster.cluster_id == self.cluster_id() {
                continue;
            }
            let cluster_id = cluster.cluster_id.clone();
            if let Err(err) = registry.register(cluster) {
                warn!("[FederationCoordinator] skipping cluster {}: {}", cluster_id, err);
            }
        }
        Ok(federation_id)
    }

    /// Stop the loops and leave the cluster transport. The registry is kept.
    pub async fn shutdown(&self) {
        self.halt_loops().await;
        self.unbind().await;
        *self.inner.federation_id.write() = None;
        info!("[FederationCoordinator] cluster {} left its federation", self.cluster_id());
    }

    fn ensure_unfederated(&self) -> Result<(), FederationError> {
        match self.federation_id() {
            Some(id) => Err(FederationError::AlreadyFederated(id)),
            None => Ok(()),
        }
    }

    async fn bind(&self) -> Result<(), FederationError> {
        let service: Arc<dyn ClusterService> = self.inner.clone();
        self.inner
            .client
            .transport()
            .register(&self.endpoint(), Arc::downgrade(&service))
            .await
    }

    async fn unbind(&self) {
        self.inner.client.transport().deregister(&self.endpoint()).await;
    }

    // ─────────────────────────────────────────────
    // Registry
    // ─────────────────────────────────────────────

    /// Register a cluster directly, then run a topology pass.
    pub fn add_cluster(&self, cluster: FederationCluster) -> Result<TopologyReport, FederationError> {
        self.inner.registry.write().register(cluster)?;
        Ok(self.inner.optimize())
    }

    /// Evict a cluster, then run a topology pass. The local cluster cannot be removed.
    pub fn remove_cluster(&self, cluster_id: &str) -> Result<FederationCluster, FederationError> {
        if cluster_id == self.cluster_id() {
            return Err(FederationError::Rejected("cannot evict the local cluster".to_string()));
        }
        let removed = self.inner.registry.write().remove(cluster_id);
        let removed = removed.ok_or_else(|| FederationError::ClusterNotFound(cluster_id.to_string()))?;
        self.inner.optimize();
        Ok(removed)
    }

    /// Override the recorded load of a cluster until its next heartbeat.
    pub fn update_cluster_load(&self, cluster_id: &str, load_factor: f64) -> bool {
        self.inner.registry.write().set_load(cluster_id, load_factor)
    }

    pub fn set_strategy(&self, strategy: LoadBalancingStrategy) {
        self.inner.balancer.lock().set_strategy(strategy);
    }

    // ─────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────

    /// Route a memory operation to the cluster chosen by the load balancer.
    ///
    /// Errors only when no operation could be created. A created operation
    /// is always returned, with `status` telling whether it completed.
    pub async fn route_memory_operation(
        &self,
        kind: OperationKind,
        fold_id: &str,
        payload: OperationPayload,
        priority: u8,
    ) -> Result<CrossClusterOperation, FederationError> {
        self.inner.route(kind, fold_id, payload, priority).await
    }

    pub fn balance_federation_load(&self) -> Vec<Migration> {
        self.inner.balance()
    }

    pub fn optimize_federation_topology(&self) -> TopologyReport {
        self.inner.optimize()
    }

    pub fn get_federation_status(&self) -> FederationStatus {
        self.inner.status()
    }

    /// Run one health-check round outside the loop schedule.
    pub async fn health_check_once(&self) {
        self.inner.health_tick().await;
    }

    // ─────────────────────────────────────────────
    // Loops
    // ─────────────────────────────────────────────

    fn spawn_loops(&self) {
        let (shutdown, rx) = watch::channel(false);
        let config = &self.inner.config;
        let mut handles = Vec::with_capacity(3);

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised("federation-health", config.health_check_interval(), rx.clone(), move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.health_tick().await;
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised("federation-rebalance", config.rebalance_interval(), rx.clone(), move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.balance();
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised("federation-topology", config.topology_interval(), rx, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.optimize();
                }
            }
        }));

        *self.runtime.lock() = Some(Runtime { shutdown, handles });
    }

    async fn halt_loops(&self) {
        let runtime = self.runtime.lock().take();
        let Some(runtime) = runtime else { return };
        if runtime.shutdown.send(true).is_err() {
            debug!("[FederationCoordinator] loops of {} already gone", self.cluster_id());
        }
        for handle in runtime.handles {
            if let Err(err) = handle.await {
                warn!("[FederationCoordinator] loop task ended abnormally: {}", err);
            }
        }
    }
}
