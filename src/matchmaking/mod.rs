//! Matchmaking: FIFO queue and periodic pairing

pub mod queue;
pub mod service;

pub use queue::QueueStatus;
pub use service::MatchmakingService;

/// Answers whether an identity is currently bound to a live match.
///
/// Implemented by the session hub; keeps the queue from pairing players who
/// are already playing without the queue holding a reference to the hub.
pub trait LiveMatches: Send + Sync {
    fn is_in_live_match(&self, identity: &str) -> bool;
}
