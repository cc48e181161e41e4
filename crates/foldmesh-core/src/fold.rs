use serde::{Deserialize, Serialize};

use crate::checksum::{compute_checksum, verify_checksum};
use crate::clock::now_millis;

/// A fold: the atomic unit of replicated data.
///
/// The payload is opaque to FoldMesh. Only `id`, `last_modified` and
/// `checksum` are consumed by replication and conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub id: String,
    pub payload: Vec<u8>,
    /// Unix milliseconds of the last write. Drives last-writer-wins.
    pub last_modified: u64,
    /// Hex SHA-256 of `payload`.
    pub checksum: String,
}

impl Fold {
    /// Create a fold stamped with the current time.
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::with_timestamp(id, payload, now_millis())
    }

    /// Create a fold with an explicit modification timestamp.
    pub fn with_timestamp(id: impl Into<String>, payload: impl Into<Vec<u8>>, last_modified: u64) -> Self {
        let payload = payload.into();
        let checksum = compute_checksum(&payload);
        Fold {
            id: id.into(),
            payload,
            last_modified,
            checksum,
        }
    }

    /// Replace the payload and re-stamp the fold.
    ///
    /// The new timestamp is strictly greater than the previous one so an
    /// update always wins last-writer-wins against the copy it replaces.
    pub fn rewrite(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
        self.checksum = compute_checksum(&self.payload);
        self.last_modified = now_millis().max(self.last_modified + 1);
    }

    /// Returns `true` if the stored checksum matches the payload.
    pub fn is_intact(&self) -> bool {
        verify_checksum(&self.payload, &self.checksum)
    }

    pub fn digest(&self) -> FoldDigest {
        FoldDigest {
            fold_id: self.id.clone(),
            checksum: self.checksum.clone(),
            last_modified: self.last_modified,
        }
    }
}

/// Kind of mutation propagated to replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

/// Inventory entry exchanged during network reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldDigest {
    pub fold_id: String,
    pub checksum: String,
    pub last_modified: u64,
}
