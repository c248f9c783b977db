//! Result persistence: finished matches are posted to an external endpoint

pub mod results;

pub use results::{run_reporter, GameType, MatchResult, ResultReporter};
