use std::sync::Arc;

use async_trait::async_trait;
use foldmesh_core::Fold;
use foldmesh_node::{DistributedMemory, WriteOutcome};
use log::{debug, warn};

use crate::error::FederationError;
use crate::operation::{CrossClusterOperation, OperationKind};

/// The memory a cluster coordinator executes routed operations against.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Node that fronts this cluster.
    fn coordinator_node(&self) -> String;

    /// Current member node ids, coordinator included.
    fn members(&self) -> Vec<String>;

    fn load_factor(&self) -> f64;

    /// Run `operation` locally. Reads return the fold payload.
    async fn execute(&self, operation: &CrossClusterOperation) -> Result<Option<Vec<u8>>, FederationError>;
}

/// [`MemoryBackend`] over a node's [`DistributedMemory`] façade.
#[derive(Clone)]
pub struct NodeBackend {
    memory: Arc<DistributedMemory>,
}

impl NodeBackend {
    pub fn new(memory: Arc<DistributedMemory>) -> Self {
        Self { memory }
    }

    pub fn memory(&self) -> &Arc<DistributedMemory> {
        &self.memory
    }

    fn report(&self, operation: &CrossClusterOperation, outcome: &WriteOutcome) {
        if outcome.is_durable() {
            debug!(
                "[NodeBackend] {} {} on {}: {:?}",
                operation.operation_type,
                operation.fold_id,
                self.memory.node_id(),
                outcome.durability
            );
        } else {
            warn!(
                "[NodeBackend] {} {} on {} not durable: {:?}",
                operation.operation_type,
                operation.fold_id,
                self.memory.node_id(),
                outcome.warnings
            );
        }
    }
}

fn payload_of(operation: &CrossClusterOperation) -> Result<Vec<u8>, FederationError> {
    operation.payload.data.clone().ok_or_else(|| {
        FederationError::Rejected(format!(
            "{} of {} carries no data",
            operation.operation_type, operation.fold_id
        ))
    })
}

#[async_trait]
impl MemoryBackend for NodeBackend {
    fn coordinator_node(&self) -> String {
        self.memory.node_id().to_string()
    }

    fn members(&self) -> Vec<String> {
        let mut members = vec![self.memory.node_id().to_string()];
        members.extend(self.memory.active_peer_ids());
        members
    }

    fn load_factor(&self) -> f64 {
        self.memory.local_info().load_factor()
    }

    async fn execute(&self, operation: &CrossClusterOperation) -> Result<Option<Vec<u8>>, FederationError> {
        let consensus = operation.payload.consensus_required;
        match operation.operation_type {
            OperationKind::Store => {
                let fold = Fold::new(operation.fold_id.clone(), payload_of(operation)?);
                let outcome = self.memory.store(fold, true, consensus).await?;
                self.report(operation, &outcome);
                Ok(None)
            }
            OperationKind::Update => {
                let outcome = self
                    .memory
                    .update(&operation.fold_id, payload_of(operation)?, consensus)
                    .await?;
                self.report(operation, &outcome);
                Ok(None)
            }
            OperationKind::Delete => {
                let outcome = self.memory.delete(&operation.fold_id, consensus).await?;
                self.report(operation, &outcome);
                Ok(None)
            }
            OperationKind::Retrieve => {
                let fold = self.memory.retrieve(&operation.fold_id, true).await?;
                Ok(Some(fold.payload))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationPayload;
    use foldmesh_core::FoldMeshConfig;
    use foldmesh_p2p::LocalNetwork;

    fn backend(id: &str) -> NodeBackend {
        let mut config = FoldMeshConfig::default();
        config.node.node_id = id.to_string();
        NodeBackend::new(Arc::new(DistributedMemory::new(config, Arc::new(LocalNetwork::new()))))
    }

    #[test]
    fn test_members_list_coordinator_then_active_peers() {
        let backend = backend("c0");
        assert_eq!(backend.members(), vec!["c0".to_string()]);

        backend.memory().add_trusted_node("c0-peer", "127.0.0.1", 9801);
        assert_eq!(backend.members(), vec!["c0".to_string(), "c0-peer".to_string()]);
        assert_eq!(backend.coordinator_node(), "c0");
    }

    #[tokio::test]
    async fn test_store_without_data_is_rejected() {
        let backend = backend("c0");
        let op = CrossClusterOperation::new(OperationKind::Store, "f", "a", "b", OperationPayload::default(), 0);
        assert!(matches!(backend.execute(&op).await, Err(FederationError::Rejected(_))));
    }
}
