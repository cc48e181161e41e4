//! FoldMesh: replicated fold memory with a federation routing layer.
//!
//! The workspace crates are re-exported here under short names. The
//! [`demo`] module wires an in-process mesh and federation together and
//! backs the `foldmesh demo` command.

pub use foldmesh_consensus as consensus;
pub use foldmesh_core as core;
pub use foldmesh_federation as federation;
pub use foldmesh_node as node;
pub use foldmesh_p2p as p2p;
pub use foldmesh_state as state;

pub use foldmesh_core::{Fold, FoldMeshConfig, FoldMeshError};
pub use foldmesh_federation::{FederationCoordinator, FederationError};
pub use foldmesh_node::{DistributedMemory, NodeError};

pub mod demo;
