//! FoldMesh federation layer.
//!
//! Groups clusters of replication nodes into a federation. A
//! [`FederationCoordinator`] fronts each cluster: it keeps the
//! [`ClusterRegistry`] current through cluster heartbeats, routes memory
//! operations with the configured [`LoadBalancer`] strategy, and runs the
//! rebalance and topology loops.

pub mod backend;
pub mod balancer;
pub mod coordinator;
pub mod error;
mod federation;
pub mod operation;
pub mod registry;
mod service;
pub mod status;
pub mod topology;
pub mod transport;

pub use backend::{MemoryBackend, NodeBackend};
pub use balancer::{load_variance, plan_rebalance, LoadBalancer, Migration};
pub use coordinator::FederationCoordinator;
pub use error::FederationError;
pub use operation::{CrossClusterOperation, OperationKind, OperationPayload, OperationStatus};
pub use registry::{health_score, ClusterRegistry, FederationCluster};
pub use status::{FederationMetrics, FederationStatus, TopologyReport};
pub use topology::{Action, Recommendation, Risk};
pub use transport::{
    ClusterClient, ClusterHeartbeat, ClusterRequest, ClusterResponse, ClusterService, ClusterTransport,
    JoinRequest, JoinResponse, LocalClusterNetwork, OperationReply,
};
