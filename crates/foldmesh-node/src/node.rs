// Actor state for one replication node.
//
// INVARIANTS:
// 1. All mutable node state lives here and is touched only through
//    `DistributedMemory` or the node's own peer service and loops
// 2. No lock guard is held across an await point
// 3. A write is never rolled back locally because replication or consensus failed
// 4. Votes are evaluated against the live active-node count at arrival

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use foldmesh_consensus::{ConsensusResult, SharedConsensus};
use foldmesh_core::{now_millis, Fold, FoldMeshConfig, FoldMeshError, NodeInfo, NodeState, OperationType};
use foldmesh_p2p::{PeerClient, PeerError, PeerManager, PeerTransport, VoteProposal};
use foldmesh_state::{
    resolve, FoldStore, Placement, ReplicationLedger, ReplicationSelector, Resolution, RetryOutcome,
    SyncOperation, SyncQueue,
};
use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::lifecycle::Lifecycle;
use crate::metrics::{BoundedHistory, HistoryEntry, NodeMetrics};
use crate::outcome::{Durability, SyncReport, SyncStep, WriteOutcome};

pub(crate) enum Verdict {
    Committed(ConsensusResult),
    Rejected(ConsensusResult),
    TimedOut(Option<ConsensusResult>, FoldMeshError),
}

pub(crate) struct NodeInner {
    pub(crate) config: FoldMeshConfig,
    pub(crate) lifecycle: Mutex<Lifecycle>,
    pub(crate) store: RwLock<FoldStore>,
    pub(crate) ledger: Mutex<ReplicationLedger>,
    pub(crate) queue: Mutex<SyncQueue>,
    pub(crate) peers: RwLock<PeerManager>,
    pub(crate) consensus: SharedConsensus,
    pub(crate) selector: ReplicationSelector,
    pub(crate) client: PeerClient,
    pub(crate) metrics: Mutex<NodeMetrics>,
    pub(crate) history: Mutex<BoundedHistory<HistoryEntry>>,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}

impl NodeInner {
    pub(crate) fn new(config: FoldMeshConfig, transport: Arc<dyn PeerTransport>) -> Self {
        let node_id = config.node.node_id.clone();
        Self {
            lifecycle: Mutex::new(Lifecycle::new(node_id.clone())),
            store: RwLock::new(FoldStore::new()),
            ledger: Mutex::new(ReplicationLedger::new()),
            queue: Mutex::new(SyncQueue::new()),
            peers: RwLock::new(PeerManager::new(node_id)),
            consensus: SharedConsensus::new(config.consensus.protocol, config.consensus.poll_interval()),
            selector: ReplicationSelector::from_config(&config.replication),
            client: PeerClient::new(transport),
            metrics: Mutex::new(NodeMetrics::default()),
            history: Mutex::new(BoundedHistory::new()),
            config,
        }
    }

    pub(crate) fn node_id(&self) -> &str {
        &self.config.node.node_id
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}:{}", self.config.node.address, self.config.node.port)
    }

    pub(crate) fn state(&self) -> NodeState {
        self.lifecycle.lock().state()
    }

    pub(crate) fn local_info(&self) -> NodeInfo {
        let node = &self.config.node;
        let mut info = NodeInfo::new(&node.node_id, &node.address, node.port);
        info.state = self.state();
        info.capacity = node.capacity;
        info.current_load = self.store.read().len() as u64;
        info
    }

    pub(crate) fn active_peer_ids(&self) -> Vec<String> {
        self.peers.read().active_peer_ids()
    }

    fn note_rpc(&self, node_id: &str, success: bool, started: Instant) {
        self.peers.write().record_rpc(node_id, success, elapsed_ms(started));
    }

    // ─────────────────────────────────────────────
    // Discovery & heartbeats
    // ─────────────────────────────────────────────

    /// Introduce this node to every seed, then to every peer the seeds know.
    pub(crate) async fn discover_peers(&self) {
        let info = self.local_info();
        let own_endpoint = self.endpoint();
        let seeds: BTreeSet<String> = self
            .config
            .node
            .seeds
            .iter()
            .filter(|seed| **seed != own_endpoint)
            .cloned()
            .collect();

        let mut learned = Vec::new();
        for seed in &seeds {
            match self.client.introduce(seed, info.clone()).await {
                Ok(peers) => learned.extend(peers),
                Err(err) => warn!("[DistributedMemory] seed {} unreachable during discovery: {}", seed, err),
            }
        }

        let now = now_millis();
        let fresh: Vec<NodeInfo> = {
            let mut table = self.peers.write();
            learned.into_iter().filter(|peer| table.merge(peer.clone(), now)).collect()
        };
        for peer in fresh {
            let endpoint = peer.endpoint();
            if seeds.contains(&endpoint) {
                continue;
            }
            if let Err(err) = self.client.introduce(&endpoint, info.clone()).await {
                debug!("[DistributedMemory] could not introduce to {}: {}", peer.node_id, err);
            }
        }
        info!(
            "[DistributedMemory] node {} discovered {} peers",
            self.node_id(),
            self.peers.read().len()
        );
    }

    pub(crate) async fn heartbeat_tick(&self) {
        if !self.state().is_participating() {
            return;
        }
        let targets = self.peers.read().all_peers();
        let local_id = self.node_id();
        let pings = targets.into_iter().map(|peer| async move {
            let started = Instant::now();
            let reply = self.client.heartbeat(&peer.endpoint(), local_id).await;
            (peer.node_id, reply, elapsed_ms(started))
        });

        for (node_id, reply, elapsed) in join_all(pings).await {
            let mut table = self.peers.write();
            match reply {
                Ok(ack) => {
                    table.record_heartbeat(&node_id, now_millis());
                    table.refresh_from_ack(&ack);
                    table.record_rpc(&node_id, true, elapsed);
                }
                Err(err) => {
                    debug!("[DistributedMemory] heartbeat to {} failed: {}", node_id, err);
                    table.record_rpc(&node_id, false, elapsed);
                }
            }
        }

        let expired = self
            .peers
            .write()
            .expire_stale(now_millis(), self.config.node.heartbeat_timeout_ms);
        if !expired.is_empty() {
            info!("[DistributedMemory] removed {:?} from the active set", expired);
        }
    }

    pub(crate) fn consensus_cleanup_tick(&self) {
        self.consensus.evict_expired(self.config.consensus.result_ttl_ms);
    }

    pub(crate) fn cleanup_tick(&self) {
        let limit = self.config.node.history_limit;
        let dropped = self.history.lock().trim(limit) + self.lifecycle.lock().trim_history(limit);
        if dropped > 0 {
            debug!("[DistributedMemory] trimmed {} history entries", dropped);
        }
    }

    // ─────────────────────────────────────────────
    // Sync queue
    // ─────────────────────────────────────────────

    /// Pop and attempt one queued operation.
    pub(crate) async fn process_next_sync(&self) -> Option<SyncStep> {
        if !self.state().is_participating() {
            return None;
        }
        let operation = self.queue.lock().pop()?;
        let failed = self.propagate(&operation).await;

        let step = if failed.is_empty() {
            self.queue.lock().complete(&operation);
            self.settle_sync(&operation);
            self.metrics.lock().sync_successes += 1;
            SyncStep::Completed
        } else {
            let exhausted = operation.exhausted_error();
            let outcome = self.queue.lock().fail(operation.clone(), failed);
            let mut metrics = self.metrics.lock();
            match outcome {
                RetryOutcome::Requeued { attempt } => {
                    metrics.sync_retries += 1;
                    SyncStep::Requeued { attempt }
                }
                RetryOutcome::Superseded => {
                    metrics.superseded += 1;
                    SyncStep::Superseded
                }
                RetryOutcome::Exhausted => {
                    metrics.sync_failures += 1;
                    warn!("[DistributedMemory] {}", exhausted);
                    SyncStep::Exhausted
                }
            }
        };

        self.history.lock().push(HistoryEntry {
            operation_id: operation.operation_id.clone(),
            fold_id: operation.fold_id.clone(),
            operation_type: operation.operation_type.as_str().to_string(),
            outcome: format!("{step:?}"),
            at: now_millis(),
        });
        Some(step)
    }

    /// Send one operation to each of its targets. Returns the targets that failed.
    async fn propagate(&self, operation: &SyncOperation) -> BTreeSet<String> {
        let calls = operation.target_nodes.iter().map(|target| async move {
            let endpoint = self.peers.read().endpoint_of(target);
            let Some(endpoint) = endpoint else {
                return (target, Err(PeerError::Rejected(format!("unknown peer {target}"))));
            };
            let started = Instant::now();
            let result = match (operation.operation_type, &operation.payload) {
                (OperationType::Delete, _) => {
                    self.client.delete_fold(&endpoint, &operation.fold_id, self.node_id()).await
                }
                (_, Some(fold)) => self.client.put_fold(&endpoint, fold.clone()).await,
                (kind, None) => Err(PeerError::Rejected(format!("{} without payload", kind.as_str()))),
            };
            self.note_rpc(target, result.is_ok(), started);
            (target, result)
        });

        let mut failed = BTreeSet::new();
        for (target, result) in join_all(calls).await {
            if let Err(err) = result {
                warn!(
                    "[DistributedMemory] {} of fold {} failed: {}",
                    operation.operation_type.as_str(),
                    operation.fold_id,
                    err.into_fold_mesh(target)
                );
                failed.insert(target.clone());
            }
        }
        failed
    }

    /// Ledger bookkeeping after every target acknowledged an operation.
    ///
    /// Consensus writes only refresh an existing record; the commit path
    /// is the one that creates it.
    fn settle_sync(&self, operation: &SyncOperation) {
        let now = now_millis();
        let mut ledger = self.ledger.lock();
        match (operation.operation_type, &operation.payload) {
            (OperationType::Delete, _) => {
                if !operation.consensus_required {
                    ledger.remove(&operation.fold_id);
                }
            }
            (_, Some(fold)) => {
                let replicas: Vec<String> = operation.target_nodes.iter().cloned().collect();
                let refreshed = ledger.refresh(&operation.fold_id, &replicas, &fold.checksum, now);
                if !refreshed && !operation.consensus_required {
                    ledger.commit(&operation.fold_id, self.node_id(), replicas, &fold.checksum, now);
                }
            }
            (_, None) => {}
        }
    }

    // ─────────────────────────────────────────────
    // Writes & consensus
    // ─────────────────────────────────────────────

    /// Queue propagation of a local write and, if asked, wait for consensus.
    pub(crate) async fn replicate(
        self: &Arc<Self>,
        operation_type: OperationType,
        fold_id: &str,
        payload: Option<Fold>,
        placement: Placement,
        consensus_required: bool,
    ) -> WriteOutcome {
        let mut outcome = WriteOutcome::local(operation_type, fold_id);
        outcome.replicas = placement.replicas.clone();
        let checksum = payload.as_ref().map(|fold| fold.checksum.clone());

        if placement.replicas.is_empty() {
            if placement.degraded {
                let warning = format!("no active peers: fold {fold_id} is held by this node only");
                warn!("[DistributedMemory] {}", warning);
                outcome.warnings.push(warning);
                outcome.confidence = 0.0;
            }
            self.metrics.lock().local_only_writes += 1;
            self.settle_commit(operation_type, fold_id, &[], checksum.as_deref());
            return outcome;
        }

        let last_modified = payload.as_ref().map(|fold| fold.last_modified).unwrap_or_else(now_millis);
        let operation = SyncOperation::new(
            operation_type,
            fold_id,
            self.node_id(),
            placement.replicas.iter().cloned(),
            payload,
            consensus_required,
            self.config.node.max_retries,
        )
        .with_priority(SyncOperation::priority_for(operation_type));
        let operation_id = operation.operation_id.clone();
        self.queue.lock().enqueue(operation);
        outcome.operation_id = Some(operation_id.clone());

        if !consensus_required {
            outcome.durability = Durability::Queued;
            return outcome;
        }

        let proposal = VoteProposal {
            operation_id,
            operation_type,
            fold_id: fold_id.to_string(),
            checksum: checksum.clone(),
            last_modified,
            proposer: self.node_id().to_string(),
        };
        match self.run_consensus(proposal).await {
            Verdict::Committed(result) => {
                self.settle_commit(operation_type, fold_id, &placement.replicas, checksum.as_deref());
                outcome.durability = Durability::Committed;
                outcome.confidence = result.confidence();
                outcome.consensus = Some(result);
            }
            Verdict::Rejected(result) => {
                let reason = result.error.clone().unwrap_or_else(|| "rejected".to_string());
                outcome.warnings.push(format!("consensus rejected: {reason}"));
                outcome.durability = Durability::NonDurable;
                outcome.confidence = result.confidence();
                outcome.consensus = Some(result);
            }
            Verdict::TimedOut(result, err) => {
                outcome.warnings.push(err.to_string());
                outcome.durability = Durability::NonDurable;
                outcome.confidence = result.as_ref().map(ConsensusResult::confidence).unwrap_or(0.0);
                outcome.consensus = result;
            }
        }
        outcome
    }

    fn settle_commit(&self, operation_type: OperationType, fold_id: &str, replicas: &[String], checksum: Option<&str>) {
        let mut ledger = self.ledger.lock();
        match (operation_type, checksum) {
            (OperationType::Delete, _) => {
                ledger.remove(fold_id);
            }
            (_, Some(checksum)) => {
                ledger.commit(fold_id, self.node_id(), replicas.iter().cloned(), checksum, now_millis());
            }
            (_, None) => {}
        }
    }

    /// Solicit votes from every active peer and wait for a decision.
    pub(crate) async fn run_consensus(self: &Arc<Self>, proposal: VoteProposal) -> Verdict {
        let operation_id = proposal.operation_id.clone();
        self.consensus.begin(&operation_id);
        if self.config.consensus.count_local_vote || self.consensus.counts_proposer() {
            let active = self.peers.read().active_count_including_self();
            self.consensus.record_vote(&operation_id, self.node_id(), true, active);
        }

        let solicitor = Arc::clone(self);
        tokio::spawn(async move { solicitor.solicit_votes(proposal).await });

        let timeout = self.config.consensus.timeout();
        let decided = self.consensus.wait_for_consensus(&operation_id, timeout).await;
        let mut metrics = self.metrics.lock();
        match decided {
            Some(result) if result.consensus_reached => {
                metrics.consensus_commits += 1;
                Verdict::Committed(result)
            }
            Some(result) => {
                metrics.consensus_rejections += 1;
                Verdict::Rejected(result)
            }
            None => {
                metrics.consensus_timeouts += 1;
                let err = FoldMeshError::ConsensusTimeout {
                    operation_id: operation_id.clone(),
                    elapsed_ms: timeout.as_millis() as u64,
                };
                warn!("[DistributedMemory] {}; local write kept", err);
                Verdict::TimedOut(self.consensus.result(&operation_id), err)
            }
        }
    }

    async fn solicit_votes(&self, proposal: VoteProposal) {
        let peers = self.peers.read().active_peers();
        let requests = peers.into_iter().map(|peer| {
            let proposal = proposal.clone();
            async move {
                let started = Instant::now();
                let operation_id = proposal.operation_id.clone();
                let reply = self.client.request_vote(&peer.endpoint(), proposal).await;
                self.note_rpc(&peer.node_id, reply.is_ok(), started);
                match reply {
                    Ok(decision) => {
                        let active = self.peers.read().active_count_including_self();
                        self.consensus
                            .record_vote(&operation_id, &peer.node_id, decision.is_approve(), active);
                    }
                    Err(err) => debug!("[DistributedMemory] no vote from {}: {}", peer.node_id, err),
                }
            }
        });
        join_all(requests).await;
    }

    // ─────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────

    /// Compare inventories with every active peer and resolve differing copies.
    pub(crate) async fn reconcile(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let peers = self.peers.read().active_peers();

        for peer in peers {
            let endpoint = peer.endpoint();
            let started = Instant::now();
            let inventory = match self.client.inventory(&endpoint).await {
                Ok(inventory) => {
                    self.note_rpc(&peer.node_id, true, started);
                    inventory
                }
                Err(err) => {
                    self.note_rpc(&peer.node_id, false, started);
                    warn!("[DistributedMemory] inventory from {} failed: {}", peer.node_id, err);
                    report.peers_unreachable.push(peer.node_id.clone());
                    continue;
                }
            };
            report.peers_contacted += 1;

            for remote in inventory {
                let local = self.store.read().get(&remote.fold_id).map(Fold::digest);
                let Some(local) = local else { continue };
                report.folds_compared += 1;
                if local.checksum == remote.checksum {
                    continue;
                }

                report.mismatches += 1;
                self.metrics.lock().checksum_mismatches += 1;
                warn!(
                    "[DistributedMemory] {} (peer {})",
                    FoldMeshError::ChecksumMismatch {
                        fold_id: remote.fold_id.clone(),
                        local: local.checksum.clone(),
                        remote: remote.checksum.clone(),
                    },
                    peer.node_id
                );

                match resolve(&local, &remote) {
                    Resolution::TakeRemote => match self.client.get_fold(&endpoint, &remote.fold_id).await {
                        Ok(Some(fold)) if fold.is_intact() => {
                            if self.adopt_if_newer(fold) {
                                report.pulled.push(remote.fold_id.clone());
                            }
                        }
                        Ok(_) => warn!("[DistributedMemory] peer {} no longer holds an intact {}", peer.node_id, remote.fold_id),
                        Err(err) => warn!("[DistributedMemory] pull of {} failed: {}", remote.fold_id, err),
                    },
                    Resolution::KeepLocal if local.last_modified > remote.last_modified => {
                        let fold = self.store.read().get(&remote.fold_id).cloned();
                        if let Some(fold) = fold {
                            match self.client.put_fold(&endpoint, fold).await {
                                Ok(()) => report.pushed.push(remote.fold_id.clone()),
                                Err(err) => warn!("[DistributedMemory] push of {} failed: {}", remote.fold_id, err),
                            }
                        }
                    }
                    // Equal timestamps: both sides keep their own copy.
                    Resolution::KeepLocal => {}
                }
            }
        }

        info!(
            "[DistributedMemory] reconciliation: {} peers, {} mismatches, {} pulled, {} pushed",
            report.peers_contacted,
            report.mismatches,
            report.pulled.len(),
            report.pushed.len()
        );
        report
    }

    /// Store `fold` unless the local copy is at least as new.
    pub(crate) fn adopt_if_newer(&self, fold: Fold) -> bool {
        let mut store = self.store.write();
        let newer = match store.get(&fold.id) {
            Some(existing) => resolve(&existing.digest(), &fold.digest()) == Resolution::TakeRemote,
            None => true,
        };
        if newer {
            store.put(fold);
        }
        newer
    }
}
