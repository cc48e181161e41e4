// Voting rules, one per consensus protocol.
//
// INVARIANTS:
// 1. Thresholds are computed from the active-node count passed at each vote,
//    never from a snapshot taken when the operation started
// 2. `active_nodes` always includes the coordinating node itself
// 3. Rules are pure: same tallies and node count, same outcome

use foldmesh_core::ConsensusProtocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Pending,
    Committed,
    Rejected(String),
}

/// Vote counting policy for one consensus protocol.
pub trait VotingRule: Send + Sync {
    fn protocol(&self) -> ConsensusProtocol;

    /// Confirmations needed to commit with `active_nodes` participants.
    fn required_votes(&self, active_nodes: usize) -> usize;

    fn evaluate(&self, confirming: usize, rejecting: usize, active_nodes: usize) -> VoteOutcome;

    /// Whether the proposer's own approval is part of the required tally.
    fn counts_proposer(&self) -> bool {
        false
    }
}

/// `floor(n / 2) + 1`.
pub fn majority_of(n: usize) -> usize {
    n / 2 + 1
}

/// Commit once confirmations reach a majority of active nodes; reject once
/// rejections reach the same threshold.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleMajority;

impl VotingRule for SimpleMajority {
    fn protocol(&self) -> ConsensusProtocol {
        ConsensusProtocol::SimpleMajority
    }

    fn required_votes(&self, active_nodes: usize) -> usize {
        majority_of(active_nodes)
    }

    fn evaluate(&self, confirming: usize, rejecting: usize, active_nodes: usize) -> VoteOutcome {
        let required = self.required_votes(active_nodes);
        if confirming >= required {
            VoteOutcome::Committed
        } else if rejecting >= required {
            VoteOutcome::Rejected(format!("{rejecting} of {active_nodes} nodes rejected (threshold {required})"))
        } else {
            VoteOutcome::Pending
        }
    }
}

/// Placeholder for a BFT quorum.
///
/// Counts exactly like [`SimpleMajority`]. A `2f + 1` of `3f + 1` quorum can
/// replace it without touching the engine or its callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByzantineFaultTolerant;

impl VotingRule for ByzantineFaultTolerant {
    fn protocol(&self) -> ConsensusProtocol {
        ConsensusProtocol::ByzantineFaultTolerant
    }

    fn required_votes(&self, active_nodes: usize) -> usize {
        SimpleMajority.required_votes(active_nodes)
    }

    fn evaluate(&self, confirming: usize, rejecting: usize, active_nodes: usize) -> VoteOutcome {
        SimpleMajority.evaluate(confirming, rejecting, active_nodes)
    }
}

/// Auto-approves on the first vote received, whatever it says.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventualConsistency;

impl VotingRule for EventualConsistency {
    fn protocol(&self) -> ConsensusProtocol {
        ConsensusProtocol::EventualConsistency
    }

    fn required_votes(&self, _active_nodes: usize) -> usize {
        1
    }

    fn evaluate(&self, confirming: usize, rejecting: usize, _active_nodes: usize) -> VoteOutcome {
        if confirming + rejecting >= 1 {
            VoteOutcome::Committed
        } else {
            VoteOutcome::Pending
        }
    }
}

/// Every active node must approve; one rejection fails the operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrongConsistency;

impl VotingRule for StrongConsistency {
    fn protocol(&self) -> ConsensusProtocol {
        ConsensusProtocol::StrongConsistency
    }

    fn required_votes(&self, active_nodes: usize) -> usize {
        active_nodes
    }

    fn counts_proposer(&self) -> bool {
        true
    }

    fn evaluate(&self, confirming: usize, rejecting: usize, active_nodes: usize) -> VoteOutcome {
        if rejecting > 0 {
            VoteOutcome::Rejected(format!("{rejecting} node(s) rejected under strong consistency"))
        } else if confirming >= active_nodes {
            VoteOutcome::Committed
        } else {
            VoteOutcome::Pending
        }
    }
}

pub fn rule_for(protocol: ConsensusProtocol) -> Box<dyn VotingRule> {
    match protocol {
        ConsensusProtocol::SimpleMajority => Box::new(SimpleMajority),
        ConsensusProtocol::ByzantineFaultTolerant => Box::new(ByzantineFaultTolerant),
        ConsensusProtocol::EventualConsistency => Box::new(EventualConsistency),
        ConsensusProtocol::StrongConsistency => Box::new(StrongConsistency),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_simple_majority_five_nodes() {
        let rule = SimpleMajority;
        assert_eq!(rule.required_votes(5), 3);
        assert_eq!(rule.evaluate(2, 0, 5), VoteOutcome::Pending);
        assert_eq!(rule.evaluate(3, 0, 5), VoteOutcome::Committed);
        assert!(matches!(rule.evaluate(1, 3, 5), VoteOutcome::Rejected(_)));
    }

    #[test]
    fn test_bft_placeholder_matches_simple_majority() {
        for n in 1..10 {
            for c in 0..=n {
                for r in 0..=(n - c) {
                    assert_eq!(
                        ByzantineFaultTolerant.evaluate(c, r, n),
                        SimpleMajority.evaluate(c, r, n)
                    );
                }
            }
        }
    }

    #[test]
    fn test_eventual_commits_on_first_vote() {
        assert_eq!(EventualConsistency.evaluate(0, 0, 7), VoteOutcome::Pending);
        assert_eq!(EventualConsistency.evaluate(0, 1, 7), VoteOutcome::Committed);
        assert_eq!(EventualConsistency.evaluate(1, 0, 7), VoteOutcome::Committed);
    }

    #[test]
    fn test_strong_requires_everyone() {
        assert_eq!(StrongConsistency.evaluate(3, 0, 4), VoteOutcome::Pending);
        assert_eq!(StrongConsistency.evaluate(4, 0, 4), VoteOutcome::Committed);
        assert!(matches!(StrongConsistency.evaluate(3, 1, 4), VoteOutcome::Rejected(_)));
    }

    #[test]
    fn test_rule_for_dispatch() {
        for protocol in [
            ConsensusProtocol::SimpleMajority,
            ConsensusProtocol::ByzantineFaultTolerant,
            ConsensusProtocol::EventualConsistency,
            ConsensusProtocol::StrongConsistency,
        ] {
            assert_eq!(rule_for(protocol).protocol(), protocol);
        }
    }

    #[test]
    fn test_only_strong_counts_proposer() {
        assert!(StrongConsistency.counts_proposer());
        assert!(!SimpleMajority.counts_proposer());
        assert!(!ByzantineFaultTolerant.counts_proposer());
        assert!(!EventualConsistency.counts_proposer());
    }

    proptest! {
        #[test]
        fn test_majority_commits_iff_threshold(total in 1usize..64, confirming in 0usize..64) {
            let confirming = confirming.min(total);
            let outcome = SimpleMajority.evaluate(confirming, 0, total);
            prop_assert_eq!(outcome == VoteOutcome::Committed, confirming >= total / 2 + 1);
        }

        #[test]
        fn test_single_rejection_fails_strong(total in 1usize..64, confirming in 0usize..64) {
            let confirming = confirming.min(total - 1);
            let outcome = StrongConsistency.evaluate(confirming, 1, total);
            prop_assert!(matches!(outcome, VoteOutcome::Rejected(_)));
        }
    }
}
