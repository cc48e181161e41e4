// Per-operation vote tallies.
//
// INVARIANTS:
// 1. A result is created lazily on the first `begin` or vote for its operation
// 2. Once decided (committed, rejected or timed out) the outcome never flips;
//    later votes are still recorded for visibility
// 3. A voter appears in at most one of confirming/rejecting (latest vote wins)
// 4. Results older than the TTL are evicted regardless of outcome

use std::collections::{BTreeSet, HashMap};

use foldmesh_core::ConsensusProtocol;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::rules::{rule_for, VoteOutcome, VotingRule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub operation_id: String,
    pub consensus_reached: bool,
    pub participating_nodes: BTreeSet<String>,
    pub confirming_nodes: BTreeSet<String>,
    pub rejecting_nodes: BTreeSet<String>,
    /// Milliseconds between the first sighting of the operation and the latest vote.
    pub elapsed_time: u64,
    pub error: Option<String>,
    /// Unix milliseconds at which the operation was first seen.
    pub started_at: u64,
    /// Threshold evaluated at the most recent vote.
    pub required_votes: usize,
}

impl ConsensusResult {
    fn new(operation_id: &str, now: u64) -> Self {
        ConsensusResult {
            operation_id: operation_id.to_string(),
            consensus_reached: false,
            participating_nodes: BTreeSet::new(),
            confirming_nodes: BTreeSet::new(),
            rejecting_nodes: BTreeSet::new(),
            elapsed_time: 0,
            error: None,
            started_at: now,
            required_votes: 0,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.consensus_reached || self.error.is_some()
    }

    /// Confirmations relative to the threshold, capped at 1.
    pub fn confidence(&self) -> f64 {
        if self.required_votes == 0 {
            return if self.consensus_reached { 1.0 } else { 0.0 };
        }
        (self.confirming_nodes.len() as f64 / self.required_votes as f64).min(1.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusStats {
    pub committed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub evicted: u64,
}

pub struct ConsensusEngine {
    rule: Box<dyn VotingRule>,
    results: HashMap<String, ConsensusResult>,
    stats: ConsensusStats,
}

impl ConsensusEngine {
    pub fn new(protocol: ConsensusProtocol) -> Self {
        Self {
            rule: rule_for(protocol),
            results: HashMap::new(),
            stats: ConsensusStats::default(),
        }
    }

    pub fn protocol(&self) -> ConsensusProtocol {
        self.rule.protocol()
    }

    /// Threshold under the configured protocol for `active_nodes` participants.
    pub fn required_votes(&self, active_nodes: usize) -> usize {
        self.rule.required_votes(active_nodes)
    }

    pub fn counts_proposer(&self) -> bool {
        self.rule.counts_proposer()
    }

    /// Register an operation before any vote arrives so its age is tracked
    /// from creation.
    pub fn begin(&mut self, operation_id: &str, now: u64) {
        self.results
            .entry(operation_id.to_string())
            .or_insert_with(|| ConsensusResult::new(operation_id, now));
    }

    /// Ingest one vote and re-evaluate with the live active-node count.
    pub fn record_vote(
        &mut self,
        operation_id: &str,
        voter: &str,
        approve: bool,
        active_nodes: usize,
        now: u64,
    ) -> ConsensusResult {
        let result = self
            .results
            .entry(operation_id.to_string())
            .or_insert_with(|| ConsensusResult::new(operation_id, now));

        result.participating_nodes.insert(voter.to_string());
        if approve {
            result.rejecting_nodes.remove(voter);
            result.confirming_nodes.insert(voter.to_string());
        } else {
            result.confirming_nodes.remove(voter);
            result.rejecting_nodes.insert(voter.to_string());
        }
        result.elapsed_time = now.saturating_sub(result.started_at);

        if result.is_decided() {
            debug!("[Consensus] late vote from {} on decided operation {}", voter, operation_id);
            return result.clone();
        }

        result.required_votes = self.rule.required_votes(active_nodes);
        match self.rule.evaluate(
            result.confirming_nodes.len(),
            result.rejecting_nodes.len(),
            active_nodes,
        ) {
            VoteOutcome::Committed => {
                result.consensus_reached = true;
                self.stats.committed += 1;
                info!(
                    "[Consensus] operation {} committed under {} ({}/{} confirmations)",
                    operation_id,
                    self.rule.protocol().as_str(),
                    result.confirming_nodes.len(),
                    result.required_votes
                );
            }
            VoteOutcome::Rejected(reason) => {
                warn!("[Consensus] operation {} rejected: {}", operation_id, reason);
                result.error = Some(reason);
                self.stats.rejected += 1;
            }
            VoteOutcome::Pending => {}
        }
        result.clone()
    }

    /// Close an undecided operation as timed out. Returns the final result.
    pub fn mark_timeout(&mut self, operation_id: &str, elapsed_ms: u64, now: u64) -> Option<ConsensusResult> {
        let result = self
            .results
            .entry(operation_id.to_string())
            .or_insert_with(|| ConsensusResult::new(operation_id, now));
        if !result.is_decided() {
            result.error = Some(format!("consensus timeout after {elapsed_ms} ms"));
            result.elapsed_time = elapsed_ms;
            self.stats.timed_out += 1;
            warn!("[Consensus] operation {} timed out after {} ms", operation_id, elapsed_ms);
        }
        Some(result.clone())
    }

    pub fn result(&self, operation_id: &str) -> Option<&ConsensusResult> {
        self.results.get(operation_id)
    }

    pub fn decided(&self, operation_id: &str) -> Option<ConsensusResult> {
        self.results.get(operation_id).filter(|r| r.is_decided()).cloned()
    }

    /// Drop every result whose operation started more than `ttl_ms` ago.
    pub fn evict_expired(&mut self, now: u64, ttl_ms: u64) -> usize {
        let before = self.results.len();
        self.results.retain(|_, r| now.saturating_sub(r.started_at) <= ttl_ms);
        let evicted = before - self.results.len();
        self.stats.evicted += evicted as u64;
        if evicted > 0 {
            debug!("[Consensus] evicted {} expired results", evicted);
        }
        evicted
    }

    pub fn results(&self) -> Vec<ConsensusResult> {
        let mut all: Vec<ConsensusResult> = self.results.values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.operation_id.cmp(&b.operation_id)));
        all
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn stats(&self) -> ConsensusStats {
        self.stats
    }
}
