//! Core types shared by every FoldMesh crate.
//!
//! - [`Fold`]: the replicated unit, an opaque payload plus id, timestamp and checksum
//! - [`NodeInfo`]: identity, lifecycle state and runtime metrics of one node
//! - [`FoldMeshConfig`]: every tunable threshold, loaded through the `config` crate
//! - [`FoldMeshError`]: the shared error taxonomy

pub mod checksum;
pub mod clock;
pub mod config;
pub mod error;
pub mod fold;
pub mod node;

pub use checksum::{compute_checksum, placement_hash, verify_checksum};
pub use clock::now_millis;
pub use config::{
    ConsensusConfig, ConsensusProtocol, FederationConfig, FoldMeshConfig, LoadBalancingStrategy,
    NodeConfig, ReplicationConfig, ReplicationStrategy,
};
pub use error::FoldMeshError;
pub use fold::{Fold, FoldDigest, OperationType};
pub use node::{NodeCapability, NodeInfo, NodeState};
