use std::sync::Arc;

use foldmesh_core::{
    compute_checksum, now_millis, Fold, FoldMeshConfig, FoldMeshError, NodeInfo, NodeState, OperationType,
};
use foldmesh_p2p::{PeerService, PeerTransport};
use foldmesh_state::Placement;
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::NodeError;
use crate::lifecycle::spawn_supervised;
use crate::node::NodeInner;
use crate::outcome::{NetworkStatus, SyncReport, SyncStep, WriteOutcome};

struct Runtime {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Node-level façade over the fold store, replication and consensus.
///
/// Every mutation of node state goes through this type or through the node's
/// peer service. Background loops run between [`start`](Self::start) and
/// [`stop`](Self::stop).
pub struct DistributedMemory {
    inner: Arc<NodeInner>,
    runtime: Mutex<Option<Runtime>>,
}

impl DistributedMemory {
    pub fn new(config: FoldMeshConfig, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            inner: Arc::new(NodeInner::new(config, transport)),
            runtime: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        self.inner.node_id()
    }

    pub fn endpoint(&self) -> String {
        self.inner.endpoint()
    }

    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    pub fn config(&self) -> &FoldMeshConfig {
        &self.inner.config
    }

    pub fn local_info(&self) -> NodeInfo {
        self.inner.local_info()
    }

    /// Ids of the peers currently in the active set.
    pub fn active_peer_ids(&self) -> Vec<String> {
        self.inner.active_peer_ids()
    }

    // ─────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────

    /// Register on the transport, discover peers through the seeds and start
    /// the background loops. A node with no reachable seed still becomes ACTIVE.
    pub async fn start(&self) -> Result<(), NodeError> {
        self.inner.lifecycle.lock().transition(NodeState::Joining)?;

        let endpoint = self.inner.endpoint();
        let service: Arc<dyn PeerService> = self.inner.clone();
        let registered = self
            .inner
            .client
            .transport()
            .register(&endpoint, Arc::downgrade(&service))
            .await;
        if let Err(err) = registered {
            error!("[DistributedMemory] node {} cannot bind {}: {}", self.node_id(), endpoint, err);
            self.inner.lifecycle.lock().transition(NodeState::Failed)?;
            return Err(err.into());
        }

        self.inner.discover_peers().await;
        self.inner.lifecycle.lock().transition(NodeState::Active)?;
        self.spawn_loops();
        info!("[DistributedMemory] node {} active at {}", self.node_id(), endpoint);
        Ok(())
    }

    /// Notify peers, stop the loops and leave the network.
    pub async fn stop(&self) -> Result<(), NodeError> {
        let state = self.state();
        if !state.is_participating() {
            return Err(FoldMeshError::InvalidState(format!("cannot stop a node that is {state}")).into());
        }

        let peers = self.inner.peers.read().active_peers();
        let node_id = self.node_id();
        let notices = peers.iter().map(|peer| async move {
            let endpoint = peer.endpoint();
            self.inner.client.shutdown_notice(&endpoint, node_id).await
        });
        for result in join_all(notices).await {
            if let Err(err) = result {
                debug!("[DistributedMemory] shutdown notice not delivered: {}", err);
            }
        }

        self.halt_loops().await;
        self.inner.client.transport().deregister(&self.inner.endpoint()).await;
        self.inner.lifecycle.lock().transition(NodeState::Offline)?;
        info!("[DistributedMemory] node {} stopped", node_id);
        Ok(())
    }

    fn spawn_loops(&self) {
        let (shutdown, rx) = watch::channel(false);
        let node = &self.inner.config.node;
        let mut handles = Vec::with_capacity(4);

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised("heartbeat", node.heartbeat_interval(), rx.clone(), move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.heartbeat_tick().await;
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised("sync", node.sync_interval(), rx.clone(), move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.process_next_sync().await;
                }
            }
        }));

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised(
            "consensus-cleanup",
            node.consensus_cleanup_interval(),
            rx.clone(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.consensus_cleanup_tick();
                    }
                }
            },
        ));

        let weak = Arc::downgrade(&self.inner);
        handles.push(spawn_supervised("cleanup", node.cleanup_interval(), rx, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    inner.cleanup_tick();
                }
            }
        }));

        *self.runtime.lock() = Some(Runtime { shutdown, handles });
    }

    async fn halt_loops(&self) {
        let runtime = self.runtime.lock().take();
        let Some(runtime) = runtime else { return };
        if runtime.shutdown.send(true).is_err() {
            debug!("[DistributedMemory] loops of {} already gone", self.node_id());
        }
        for handle in runtime.handles {
            if let Err(err) = handle.await {
                warn!("[DistributedMemory] loop task ended abnormally: {}", err);
            }
        }
    }

    // ─────────────────────────────────────────────
    // Fold operations
    // ─────────────────────────────────────────────

    fn ensure_writable(&self) -> Result<(), NodeError> {
        let state = self.state();
        if state.accepts_writes() {
            Ok(())
        } else {
            Err(NodeError::NotAccepting(state))
        }
    }

    /// Write `fold` locally, then replicate it and optionally wait for consensus.
    ///
    /// A consensus timeout or rejection leaves the local write in place and is
    /// reported as [`Durability::NonDurable`](crate::Durability::NonDurable).
    pub async fn store(&self, fold: Fold, replicate: bool, consensus_required: bool) -> Result<WriteOutcome, NodeError> {
        self.ensure_writable()?;
        if !fold.is_intact() {
            return Err(FoldMeshError::ChecksumMismatch {
                fold_id: fold.id.clone(),
                local: compute_checksum(&fold.payload),
                remote: fold.checksum.clone(),
            }
            .into());
        }

        self.inner.store.write().put(fold.clone());
        self.inner.metrics.lock().stores += 1;
        debug!("[DistributedMemory] stored fold {} locally", fold.id);

        if !replicate {
            return Ok(WriteOutcome::local(OperationType::Create, &fold.id));
        }
        let placement = self.inner.selector.select(&fold.id, &self.inner.active_peer_ids());
        let fold_id = fold.id.clone();
        Ok(self
            .inner
            .replicate(OperationType::Create, &fold_id, Some(fold), placement, consensus_required)
            .await)
    }

    /// Replace the payload of an existing fold and propagate the new version.
    pub async fn update(
        &self,
        fold_id: &str,
        payload: impl Into<Vec<u8>>,
        consensus_required: bool,
    ) -> Result<WriteOutcome, NodeError> {
        self.ensure_writable()?;
        let fold = {
            let mut store = self.inner.store.write();
            let mut fold = store.get(fold_id).cloned().ok_or_else(|| NodeError::not_found(fold_id))?;
            fold.rewrite(payload);
            store.put(fold.clone());
            fold
        };
        self.inner.metrics.lock().updates += 1;

        let active = self.inner.active_peer_ids();
        let recorded: Vec<String> = self
            .inner
            .ledger
            .lock()
            .replicas_of(fold_id)
            .into_iter()
            .filter(|node_id| active.contains(node_id))
            .collect();
        let placement = if recorded.is_empty() {
            self.inner.selector.select(fold_id, &active)
        } else {
            Placement { replicas: recorded, degraded: false }
        };
        Ok(self
            .inner
            .replicate(OperationType::Update, fold_id, Some(fold), placement, consensus_required)
            .await)
    }

    /// Local copy if present and preferred, else the first intact copy found on
    /// a recorded replica, else on any active peer.
    pub async fn retrieve(&self, fold_id: &str, prefer_local: bool) -> Result<Fold, NodeError> {
        self.inner.metrics.lock().retrieves += 1;
        let local = self.inner.store.read().get(fold_id).cloned();
        if prefer_local {
            if let Some(fold) = local {
                return Ok(fold);
            }
        }

        let mut candidates = self.inner.ledger.lock().replicas_of(fold_id);
        for node_id in self.inner.active_peer_ids() {
            if !candidates.contains(&node_id) {
                candidates.push(node_id);
            }
        }

        for node_id in candidates {
            let endpoint = self.inner.peers.read().endpoint_of(&node_id);
            let Some(endpoint) = endpoint else { continue };
            match self.inner.client.get_fold(&endpoint, fold_id).await {
                Ok(Some(fold)) if fold.is_intact() => return Ok(fold),
                Ok(Some(_)) => {
                    self.inner.metrics.lock().checksum_mismatches += 1;
                    warn!("[DistributedMemory] corrupt copy of {} on {}", fold_id, node_id);
                }
                Ok(None) => {}
                Err(err) => debug!("[DistributedMemory] get_fold on {} failed: {}", node_id, err),
            }
        }
        local.ok_or_else(|| NodeError::not_found(fold_id))
    }

    /// Remove the local copy now and propagate the delete to every known replica.
    pub async fn delete(&self, fold_id: &str, consensus_required: bool) -> Result<WriteOutcome, NodeError> {
        self.ensure_writable()?;
        let removed = self.inner.store.write().remove(fold_id);
        let (recorded, has_record) = {
            let ledger = self.inner.ledger.lock();
            (ledger.replicas_of(fold_id), ledger.get(fold_id).is_some())
        };
        if removed.is_none() && !has_record {
            return Err(NodeError::not_found(fold_id));
        }
        self.inner.metrics.lock().deletes += 1;

        let replicas = if recorded.is_empty() { self.inner.active_peer_ids() } else { recorded };
        let placement = Placement { replicas, degraded: false };
        Ok(self
            .inner
            .replicate(OperationType::Delete, fold_id, None, placement, consensus_required)
            .await)
    }

    // ─────────────────────────────────────────────
    // Network
    // ─────────────────────────────────────────────

    /// Full reconciliation pass against every active peer.
    pub async fn synchronize_with_network(&self) -> Result<SyncReport, NodeError> {
        let entered = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match lifecycle.state() {
                NodeState::Active => {
                    lifecycle.transition(NodeState::Syncing)?;
                    true
                }
                NodeState::Syncing => false,
                other => {
                    return Err(FoldMeshError::InvalidState(format!("cannot synchronize while {other}")).into());
                }
            }
        };

        let report = self.inner.reconcile().await;

        if entered {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state() == NodeState::Syncing {
                lifecycle.transition(NodeState::Active)?;
            }
        }
        Ok(report)
    }

    /// Admit a peer without any handshake. There is no authentication layer:
    /// the caller vouches for the node.
    pub fn add_trusted_node(&self, node_id: &str, address: &str, port: u16) -> bool {
        let admitted = self
            .inner
            .peers
            .write()
            .admit(NodeInfo::new(node_id, address, port), now_millis());
        if admitted {
            info!("[DistributedMemory] trusted {} at {}:{} without handshake", node_id, address, port);
        }
        admitted
    }

    pub fn get_network_status(&self) -> NetworkStatus {
        let inner = &self.inner;
        let (peers, active_peers) = {
            let table = inner.peers.read();
            (table.all_peers(), table.active_peer_ids())
        };
        let (pending_sync, sync_queue) = {
            let queue = inner.queue.lock();
            (queue.snapshot(), queue.stats())
        };
        NetworkStatus {
            node: inner.local_info(),
            state: inner.state(),
            peers,
            active_peers,
            fold_count: inner.store.read().len(),
            replication_records: inner.ledger.lock().records(),
            pending_sync,
            sync_queue,
            consensus_results: inner.consensus.results(),
            consensus: inner.consensus.stats(),
            metrics: *inner.metrics.lock(),
            recent_operations: inner.history.lock().entries(),
            transitions: inner.lifecycle.lock().transitions(),
        }
    }

    // ─────────────────────────────────────────────
    // Manual ticks
    // ─────────────────────────────────────────────

    /// Run one heartbeat round outside the loop schedule.
    pub async fn heartbeat_once(&self) {
        self.inner.heartbeat_tick().await;
    }

    /// Attempt the operation at the head of the sync queue.
    pub async fn process_sync_queue_once(&self) -> Option<SyncStep> {
        self.inner.process_next_sync().await
    }

    /// Process queued operations until the queue is empty or `max_steps` ran.
    pub async fn drain_sync_queue(&self, max_steps: usize) -> Vec<SyncStep> {
        let mut steps = Vec::new();
        while steps.len() < max_steps {
            match self.inner.process_next_sync().await {
                Some(step) => steps.push(step),
                None => break,
            }
        }
        steps
    }

    pub fn pending_sync_operations(&self) -> usize {
        self.inner.queue.lock().len()
    }
}
