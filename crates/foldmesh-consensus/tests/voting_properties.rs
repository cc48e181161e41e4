// Consensus arithmetic across protocols, exercised through the public engine API.

use foldmesh_consensus::{ConsensusEngine, ConsensusProtocol};
use proptest::prelude::*;

fn cast(engine: &mut ConsensusEngine, op: &str, approvals: usize, rejections: usize, active: usize) -> (bool, bool) {
    let mut last = None;
    for i in 0..approvals {
        last = Some(engine.record_vote(op, &format!("yes-{i}"), true, active, 0));
    }
    for i in 0..rejections {
        last = Some(engine.record_vote(op, &format!("no-{i}"), false, active, 0));
    }
    match last {
        Some(r) => (r.consensus_reached, r.error.is_some()),
        None => (false, false),
    }
}

#[test]
fn test_five_nodes_three_confirmations_commit() {
    let mut engine = ConsensusEngine::new(ConsensusProtocol::SimpleMajority);
    assert_eq!(cast(&mut engine, "three", 3, 0, 5), (true, false));
    let mut engine = ConsensusEngine::new(ConsensusProtocol::SimpleMajority);
    assert_eq!(cast(&mut engine, "two", 2, 0, 5), (false, false));
}

#[test]
fn test_strong_consistency_needs_all_four() {
    let mut engine = ConsensusEngine::new(ConsensusProtocol::StrongConsistency);
    assert_eq!(cast(&mut engine, "op", 4, 0, 4), (true, false));

    let mut engine = ConsensusEngine::new(ConsensusProtocol::StrongConsistency);
    let (reached, failed) = cast(&mut engine, "op", 1, 1, 4);
    assert!(!reached);
    assert!(failed);
}

#[test]
fn test_eventual_consistency_first_vote_wins() {
    let mut engine = ConsensusEngine::new(ConsensusProtocol::EventualConsistency);
    let r = engine.record_vote("op", "peer", false, 10, 0);
    assert!(r.consensus_reached);
}

proptest! {
    #[test]
    fn test_majority_rejects_iff_threshold(total in 1usize..40, rejecting in 0usize..40) {
        let rejecting = rejecting.min(total);
        let mut engine = ConsensusEngine::new(ConsensusProtocol::SimpleMajority);
        let (_, failed) = cast(&mut engine, "op", 0, rejecting, total);
        prop_assert_eq!(failed, rejecting >= total / 2 + 1);
    }
}
