//! FoldMesh replication node.
//!
//! [`DistributedMemory`] is the node façade: it owns the fold store, the
//! replication ledger, the sync queue, the peer table and the consensus
//! engine, and drives the heartbeat, sync, consensus-cleanup and cleanup
//! loops between `start` and `stop`.

pub mod error;
pub mod lifecycle;
pub mod metrics;
mod node;
pub mod orchestrator;
pub mod outcome;
mod service;

pub use error::NodeError;
pub use lifecycle::{Lifecycle, Transition};
pub use metrics::{HistoryEntry, NodeMetrics};
pub use orchestrator::DistributedMemory;
pub use outcome::{Durability, NetworkStatus, SyncReport, SyncStep, WriteOutcome};
