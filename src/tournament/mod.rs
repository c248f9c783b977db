pub mod bracket;
pub mod registry;

pub use bracket::{BracketMatch, BracketMatchStatus};
pub use registry::{Tournament, TournamentLeave, TournamentRegistry, TournamentStatus};
