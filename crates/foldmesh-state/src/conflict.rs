//! Last-writer-wins resolution between two copies of the same fold.
//!
//! The copy with the strictly later `last_modified` wins. On an exact tie the
//! local copy is kept, so a node never adopts a remote copy it cannot prove
//! is newer.

use foldmesh_core::FoldDigest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
}

pub fn resolve(local: &FoldDigest, remote: &FoldDigest) -> Resolution {
    if remote.last_modified > local.last_modified {
        Resolution::TakeRemote
    } else {
        Resolution::KeepLocal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldmesh_core::Fold;

    #[test]
    fn test_later_timestamp_wins_either_side() {
        let old = Fold::with_timestamp("f", b"old".to_vec(), 10);
        let new = Fold::with_timestamp("f", b"new".to_vec(), 20);
        assert_eq!(resolve(&old.digest(), &new.digest()), Resolution::TakeRemote);
        assert_eq!(resolve(&new.digest(), &old.digest()), Resolution::KeepLocal);
    }

    #[test]
    fn test_tie_keeps_local() {
        let local = Fold::with_timestamp("f", b"local".to_vec(), 10);
        let remote = Fold::with_timestamp("f", b"remote".to_vec(), 10);
        assert_eq!(resolve(&local.digest(), &remote.digest()), Resolution::KeepLocal);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut local = Fold::with_timestamp("f", b"old".to_vec(), 10);
        let remote = Fold::with_timestamp("f", b"new".to_vec(), 20);

        assert_eq!(resolve(&local.digest(), &remote.digest()), Resolution::TakeRemote);
        local = remote.clone();
        assert_eq!(resolve(&local.digest(), &remote.digest()), Resolution::KeepLocal);
    }
}
