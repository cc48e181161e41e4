//! Peer networking for FoldMesh nodes.
//!
//! - [`message`]: the symmetric peer RPC surface as serializable enums
//! - [`transport`]: the `PeerTransport` / `PeerService` seam and a typed [`PeerClient`]
//! - [`local`]: [`LocalNetwork`], an in-process transport with partition injection
//! - [`peer_manager`]: known-node table, heartbeat staleness and per-peer metrics

pub mod error;
pub mod local;
pub mod message;
pub mod peer_manager;
pub mod transport;

pub use error::PeerError;
pub use local::LocalNetwork;
pub use message::{PeerRequest, PeerResponse, Vote, VoteDecision, VoteProposal};
pub use peer_manager::PeerManager;
pub use transport::{PeerClient, PeerService, PeerTransport};
