use chrono::Utc;

/// Wall-clock time as Unix milliseconds.
///
/// Every timestamp in FoldMesh (fold modification, heartbeats, record
/// verification) uses this unit so values compare across nodes.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
