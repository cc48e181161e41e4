use std::sync::Arc;
use std::time::Duration;

use foldmesh_core::{now_millis, ConsensusProtocol};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::engine::{ConsensusEngine, ConsensusResult, ConsensusStats};

/// Cloneable handle to a node's consensus engine.
///
/// The lock is only held for the duration of a tally update and is never
/// held across an await point, so waiters never block vote ingestion.
#[derive(Clone)]
pub struct SharedConsensus {
    engine: Arc<Mutex<ConsensusEngine>>,
    poll_interval: Duration,
}

impl SharedConsensus {
    pub fn new(protocol: ConsensusProtocol, poll_interval: Duration) -> Self {
        Self {
            engine: Arc::new(Mutex::new(ConsensusEngine::new(protocol))),
            poll_interval,
        }
    }

    pub fn protocol(&self) -> ConsensusProtocol {
        self.engine.lock().protocol()
    }

    pub fn required_votes(&self, active_nodes: usize) -> usize {
        self.engine.lock().required_votes(active_nodes)
    }

    pub fn counts_proposer(&self) -> bool {
        self.engine.lock().counts_proposer()
    }

    pub fn begin(&self, operation_id: &str) {
        self.engine.lock().begin(operation_id, now_millis());
    }

    pub fn record_vote(&self, operation_id: &str, voter: &str, approve: bool, active_nodes: usize) -> ConsensusResult {
        self.engine
            .lock()
            .record_vote(operation_id, voter, approve, active_nodes, now_millis())
    }

    /// Poll until `operation_id` is decided or `timeout` elapses.
    ///
    /// Returns `None` on timeout; the result is then frozen as timed out so
    /// late votes cannot commit an operation the caller already gave up on.
    pub async fn wait_for_consensus(&self, operation_id: &str, timeout: Duration) -> Option<ConsensusResult> {
        let started = Instant::now();
        loop {
            let decided = self.engine.lock().decided(operation_id);
            if decided.is_some() {
                return decided;
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                self.engine
                    .lock()
                    .mark_timeout(operation_id, elapsed.as_millis() as u64, now_millis());
                return None;
            }
            tokio::time::sleep(self.poll_interval.min(timeout - elapsed)).await;
        }
    }

    pub fn result(&self, operation_id: &str) -> Option<ConsensusResult> {
        self.engine.lock().result(operation_id).cloned()
    }

    pub fn evict_expired(&self, ttl_ms: u64) -> usize {
        self.engine.lock().evict_expired(now_millis(), ttl_ms)
    }

    pub fn results(&self) -> Vec<ConsensusResult> {
        self.engine.lock().results()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.engine.lock().stats()
    }
}
