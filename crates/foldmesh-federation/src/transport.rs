use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use foldmesh_core::NodeCapability;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FederationError;
use crate::operation::CrossClusterOperation;
use crate::registry::FederationCluster;

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Federation the joiner expects; `None` joins whatever the host runs.
    pub federation_id: Option<String>,
    pub cluster: FederationCluster,
    pub capabilities: BTreeSet<NodeCapability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub accepted: bool,
    pub federation_id: Option<String>,
    /// Every cluster the host knows, in registration order.
    pub topology: Vec<FederationCluster>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationReply {
    pub cluster_id: String,
    pub success: bool,
    pub data: Option<Vec<u8>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterHeartbeat {
    pub cluster_id: String,
    pub load_factor: f64,
    pub members: Vec<String>,
    pub at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterRequest {
    Join(JoinRequest),
    Propagate(CrossClusterOperation),
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterResponse {
    Joined(JoinResponse),
    Executed(OperationReply),
    Heartbeat(ClusterHeartbeat),
}

// ─────────────────────────────────────────────
// Service / transport seams
// ─────────────────────────────────────────────

/// Served by every federation coordinator.
#[async_trait]
pub trait ClusterService: Send + Sync {
    async fn handle(&self, request: ClusterRequest) -> Result<ClusterResponse, FederationError>;
}

#[async_trait]
pub trait ClusterTransport: Send + Sync {
    async fn register(&self, endpoint: &str, service: Weak<dyn ClusterService>) -> Result<(), FederationError>;

    async fn deregister(&self, endpoint: &str);

    async fn send(&self, endpoint: &str, request: ClusterRequest) -> Result<ClusterResponse, FederationError>;
}

#[derive(Clone)]
pub struct ClusterClient {
    transport: Arc<dyn ClusterTransport>,
}

fn unexpected(request: &str, response: &ClusterResponse) -> FederationError {
    let name = match response {
        ClusterResponse::Joined(_) => "joined",
        ClusterResponse::Executed(_) => "executed",
        ClusterResponse::Heartbeat(_) => "heartbeat",
    };
    FederationError::Rejected(format!("unexpected {name} response to {request}"))
}

impl ClusterClient {
    pub fn new(transport: Arc<dyn ClusterTransport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Arc<dyn ClusterTransport> {
        &self.transport
    }

    pub async fn join_request(&self, endpoint: &str, request: JoinRequest) -> Result<JoinResponse, FederationError> {
        match self.transport.send(endpoint, ClusterRequest::Join(request)).await? {
            ClusterResponse::Joined(response) => Ok(response),
            other => Err(unexpected("join_request", &other)),
        }
    }

    pub async fn propagate_cross_cluster_op(
        &self,
        endpoint: &str,
        operation: CrossClusterOperation,
    ) -> Result<OperationReply, FederationError> {
        match self.transport.send(endpoint, ClusterRequest::Propagate(operation)).await? {
            ClusterResponse::Executed(reply) => Ok(reply),
            other => Err(unexpected("propagate_cross_cluster_op", &other)),
        }
    }

    pub async fn cluster_heartbeat(&self, endpoint: &str) -> Result<ClusterHeartbeat, FederationError> {
        match self.transport.send(endpoint, ClusterRequest::Heartbeat).await? {
            ClusterResponse::Heartbeat(beat) => Ok(beat),
            other => Err(unexpected("cluster_heartbeat", &other)),
        }
    }
}

// ─────────────────────────────────────────────
// LocalClusterNetwork
// ─────────────────────────────────────────────

/// In-process cluster transport. Frames every message with bincode.
#[derive(Default)]
pub struct LocalClusterNetwork {
    services: DashMap<String, Weak<dyn ClusterService>>,
    partitioned: DashSet<String>,
}

impl LocalClusterNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition(&self, endpoint: &str) {
        self.partitioned.insert(endpoint.to_string());
    }

    pub fn heal(&self, endpoint: &str) {
        self.partitioned.remove(endpoint);
    }

    pub fn is_registered(&self, endpoint: &str) -> bool {
        self.services
            .get(endpoint)
            .map(|svc| svc.strong_count() > 0)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ClusterTransport for LocalClusterNetwork {
    async fn register(&self, endpoint: &str, service: Weak<dyn ClusterService>) -> Result<(), FederationError> {
        if self.is_registered(endpoint) {
            return Err(FederationError::Rejected(format!("endpoint {endpoint} already in use")));
        }
        self.services.insert(endpoint.to_string(), service);
        debug!("[LocalClusterNetwork] registered {}", endpoint);
        Ok(())
    }

    async fn deregister(&self, endpoint: &str) {
        self.services.remove(endpoint);
        debug!("[LocalClusterNetwork] deregistered {}", endpoint);
    }

    async fn send(&self, endpoint: &str, request: ClusterRequest) -> Result<ClusterResponse, FederationError> {
        if self.partitioned.contains(endpoint) {
            return Err(FederationError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "partitioned".to_string(),
            });
        }
        let service = self.services.get(endpoint).and_then(|svc| svc.upgrade());
        let service = service.ok_or_else(|| FederationError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: "no coordinator listening".to_string(),
        })?;

        let frame = bincode::serialize(&request)?;
        let response = service.handle(bincode::deserialize(&frame)?).await?;
        let frame = bincode::serialize(&response)?;
        Ok(bincode::deserialize(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Beacon;

    #[async_trait]
    impl ClusterService for Beacon {
        async fn handle(&self, request: ClusterRequest) -> Result<ClusterResponse, FederationError> {
            match request {
                ClusterRequest::Heartbeat => Ok(ClusterResponse::Heartbeat(ClusterHeartbeat {
                    cluster_id: "beacon".into(),
                    load_factor: 0.25,
                    members: vec!["n1".into()],
                    at: 7,
                })),
                _ => Err(FederationError::Rejected("heartbeat only".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_heartbeat_round_trip_and_partition() {
        let net = Arc::new(LocalClusterNetwork::new());
        let beacon: Arc<dyn ClusterService> = Arc::new(Beacon);
        net.register("10.0.0.1:1", Arc::downgrade(&beacon)).await.unwrap();
        let client = ClusterClient::new(net.clone());

        let beat = client.cluster_heartbeat("10.0.0.1:1").await.unwrap();
        assert_eq!(beat.cluster_id, "beacon");
        assert_eq!(beat.load_factor, 0.25);

        net.partition("10.0.0.1:1");
        let err = client.cluster_heartbeat("10.0.0.1:1").await.unwrap_err();
        assert!(err.is_transient());
        net.heal("10.0.0.1:1");
        assert!(client.cluster_heartbeat("10.0.0.1:1").await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_service_is_unreachable() {
        let net = Arc::new(LocalClusterNetwork::new());
        let beacon: Arc<dyn ClusterService> = Arc::new(Beacon);
        net.register("10.0.0.1:1", Arc::downgrade(&beacon)).await.unwrap();
        drop(beacon);

        let client = ClusterClient::new(net.clone());
        assert!(matches!(
            client.cluster_heartbeat("10.0.0.1:1").await,
            Err(FederationError::Unreachable { .. })
        ));
    }
}
