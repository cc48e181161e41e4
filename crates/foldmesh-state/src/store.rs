use std::collections::HashMap;

use foldmesh_core::{Fold, FoldDigest};

/// In-memory map of fold id to the node's local copy.
#[derive(Debug, Default, Clone)]
pub struct FoldStore {
    folds: HashMap<String, Fold>,
}

impl FoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a fold. Returns the previous copy, if any.
    pub fn put(&mut self, fold: Fold) -> Option<Fold> {
        self.folds.insert(fold.id.clone(), fold)
    }

    pub fn get(&self, fold_id: &str) -> Option<&Fold> {
        self.folds.get(fold_id)
    }

    pub fn contains(&self, fold_id: &str) -> bool {
        self.folds.contains_key(fold_id)
    }

    pub fn remove(&mut self, fold_id: &str) -> Option<Fold> {
        self.folds.remove(fold_id)
    }

    /// Digest of every stored fold, sorted by id.
    pub fn inventory(&self) -> Vec<FoldDigest> {
        let mut digests: Vec<FoldDigest> = self.folds.values().map(Fold::digest).collect();
        digests.sort_by(|a, b| a.fold_id.cmp(&b.fold_id));
        digests
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_replaces_and_returns_previous() {
        let mut store = FoldStore::new();
        assert!(store.put(Fold::with_timestamp("a", b"v1".to_vec(), 1)).is_none());
        let previous = store.put(Fold::with_timestamp("a", b"v2".to_vec(), 2)).unwrap();
        assert_eq!(previous.payload, b"v1");
        assert_eq!(store.get("a").unwrap().payload, b"v2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_inventory_sorted_by_id() {
        let mut store = FoldStore::new();
        store.put(Fold::with_timestamp("b", b"x".to_vec(), 1));
        store.put(Fold::with_timestamp("a", b"y".to_vec(), 2));
        let ids: Vec<String> = store.inventory().into_iter().map(|d| d.fold_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
