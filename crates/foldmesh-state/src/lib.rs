//! Node-local replication state: the fold store, replica placement, the
//! replication ledger, the sync operation queue and conflict resolution.
//!
//! Nothing in this crate performs I/O. The node crate owns one instance of
//! each structure and drives it from its façade and background loops.

pub mod conflict;
pub mod replication;
pub mod store;
pub mod sync_queue;

pub use conflict::{resolve, Resolution};
pub use replication::{quorum_size, Placement, ReplicationLedger, ReplicationRecord, ReplicationSelector};
pub use store::FoldStore;
pub use sync_queue::{RetryOutcome, SyncOperation, SyncQueue, SyncQueueStats};
