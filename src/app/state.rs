//! Application state shared across routes

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::matchmaking::MatchmakingService;
use crate::rooms::RoomRegistry;
use crate::session::{HubConfig, SessionHub};
use crate::store::MatchResult;
use crate::tournament::TournamentRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: Arc<MatchmakingService>,
    pub rooms: Arc<RoomRegistry>,
    pub tournaments: Arc<TournamentRegistry>,
    pub hub: Arc<SessionHub>,
}

impl AppState {
    /// Build every service. Finished matches are sent on the returned receiver.
    pub fn new(config: Config) -> (Self, mpsc::UnboundedReceiver<MatchResult>) {
        let config = Arc::new(config);

        let matchmaking = Arc::new(MatchmakingService::new(config.pairing_interval));
        let rooms = Arc::new(RoomRegistry::new(config.retention));
        let tournaments = Arc::new(TournamentRegistry::new(config.retention));

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(SessionHub::new(
            HubConfig::from_config(&config),
            matchmaking.clone(),
            rooms.clone(),
            tournaments.clone(),
            results_tx,
        ));

        let state = Self {
            config,
            matchmaking,
            rooms,
            tournaments,
            hub,
        };
        (state, results_rx)
    }
}
