//! Match simulation modules

pub mod r#match;
pub mod physics;

pub use r#match::MatchSimulation;

/// Stable player key issued by the authentication collaborator
pub type Identity = String;

/// Default score limit for matchmaking games
pub const DEFAULT_MAX_SCORE: u32 = 5;

/// Upper bound accepted for room/tournament score limits
pub const MAX_SCORE_LIMIT: u32 = 21;
