//! Vote counting for FoldMesh replication.
//!
//! This is a lightweight coordination layer, not a consensus log: no leader
//! election, no log replication. Each [`ConsensusProtocol`] maps to one
//! [`VotingRule`]; the [`ConsensusEngine`] tallies votes per operation and
//! [`SharedConsensus`] lets callers wait for a decision with a timeout.

pub mod engine;
pub mod rules;
pub mod shared;

pub use engine::{ConsensusEngine, ConsensusResult, ConsensusStats};
pub use foldmesh_core::ConsensusProtocol;
pub use rules::{rule_for, VoteOutcome, VotingRule};
pub use shared::SharedConsensus;
