// Content hashing for divergence detection and ring placement.
//
// INVARIANTS:
// 1. The checksum depends only on the payload bytes (same content, same checksum on every node)
// 2. The placement hash is stable across processes and releases (no randomized hasher)

use sha2::{Digest, Sha256};

/// Compute the hex-encoded SHA-256 content hash of a fold payload.
pub fn compute_checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Returns `true` when `checksum` matches the payload content.
pub fn verify_checksum(payload: &[u8], checksum: &str) -> bool {
    compute_checksum(payload) == checksum
}

/// Deterministic 64-bit hash of a fold id, used by ring placement.
///
/// Takes the first eight bytes of SHA-256(fold_id) as a big-endian integer.
pub fn placement_hash(fold_id: &str) -> u64 {
    let digest = Sha256::digest(fold_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_content_addressed() {
        let a = compute_checksum(b"fold-payload");
        let b = compute_checksum(b"fold-payload");
        let c = compute_checksum(b"fold-payload!");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_verify_checksum() {
        let sum = compute_checksum(b"abc");
        assert!(verify_checksum(b"abc", &sum));
        assert!(!verify_checksum(b"abd", &sum));
    }

    #[test]
    fn test_placement_hash_known_value() {
        // SHA-256("") = e3b0c44298fc1c14...
        assert_eq!(placement_hash(""), 0xe3b0_c442_98fc_1c14);
        assert_eq!(placement_hash("fold-1"), placement_hash("fold-1"));
    }
}
