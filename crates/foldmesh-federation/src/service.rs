use async_trait::async_trait;
use foldmesh_core::now_millis;
use log::{info, warn};

use crate::error::FederationError;
use crate::federation::CoordinatorInner;
use crate::operation::CrossClusterOperation;
use crate::transport::{
    ClusterHeartbeat, ClusterRequest, ClusterResponse, ClusterService, JoinRequest, JoinResponse, OperationReply,
};

#[async_trait]
impl ClusterService for CoordinatorInner {
    async fn handle(&self, request: ClusterRequest) -> Result<ClusterResponse, FederationError> {
        match request {
            ClusterRequest::Join(request) => Ok(ClusterResponse::Joined(self.admit(request))),
            ClusterRequest::Propagate(operation) => Ok(ClusterResponse::Executed(self.run_routed(operation).await)),
            ClusterRequest::Heartbeat => Ok(ClusterResponse::Heartbeat(ClusterHeartbeat {
                cluster_id: self.cluster_id().to_string(),
                load_factor: self.backend.load_factor(),
                members: self.backend.members(),
                at: now_millis(),
            })),
        }
    }
}

impl CoordinatorInner {
    fn admit(&self, request: JoinRequest) -> JoinResponse {
        let federation_id = self.federation_id();
        let refusal = match (&federation_id, &request.federation_id) {
            (None, _) => Some("host is not part of a federation".to_string()),
            (Some(ours), Some(theirs)) if ours != theirs => Some(format!("host runs federation {ours}, not {theirs}")),
            _ => None,
        };
        let refusal = refusal.or_else(|| {
            let mut cluster = request.cluster;
            cluster.capabilities = request.capabilities;
            cluster.last_heartbeat = now_millis();
            let cluster_id = cluster.cluster_id.clone();
            match self.registry.write().register(cluster) {
                Ok(()) => {
                    info!("[FederationCoordinator] cluster {} joined the federation", cluster_id);
                    None
                }
                Err(err) => Some(err.to_string()),
            }
        });

        if let Some(reason) = refusal {
            warn!("[FederationCoordinator] join refused: {}", reason);
            self.metrics.lock().joins_rejected += 1;
            return JoinResponse {
                accepted: false,
                federation_id,
                topology: Vec::new(),
                reason: Some(reason),
            };
        }

        self.metrics.lock().joins_accepted += 1;
        self.optimize();
        JoinResponse {
            accepted: true,
            federation_id,
            topology: self.registry.read().ordered(),
            reason: None,
        }
    }

    async fn run_routed(&self, operation: CrossClusterOperation) -> OperationReply {
        let result = self.backend.execute(&operation).await;
        match result {
            Ok(data) => OperationReply {
                cluster_id: self.cluster_id().to_string(),
                success: true,
                data,
                message: None,
            },
            Err(err) => OperationReply {
                cluster_id: self.cluster_id().to_string(),
                success: false,
                data: None,
                message: Some(err.to_string()),
            },
        }
    }
}
