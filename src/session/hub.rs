//! Session hub: binds connections to matches and drives the tick loops

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::game::{Identity, DEFAULT_MAX_SCORE};
use crate::matchmaking::{LiveMatches, MatchmakingService};
use crate::rooms::{RoomRegistry, RoomStatus};
use crate::store::MatchResult;
use crate::tournament::{BracketMatchStatus, TournamentRegistry};
use crate::util::time::{tick_duration, Timer, DEFAULT_TICK_RATE};
use crate::ws::protocol::{ClientMsg, Direction, MatchStatus, ServerMsg, Side};

use super::live::{push, ConnectionId, GameOwner, LiveMatch, RosterEntry, Seat};

/// Frames buffered per connection before new ones are dropped
pub const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    pub tick_rate: u32,
    /// Score limit for matchmaking games
    pub default_max_score: u32,
}

impl HubConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_rate: config.tick_rate,
            default_max_score: config.default_max_score,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            default_max_score: DEFAULT_MAX_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Binding {
    game_id: Uuid,
    side: Side,
}

struct Connection {
    /// Authenticated identity from the upgrade request
    identity: Identity,
    email: Option<String>,
    outbound: mpsc::Sender<ServerMsg>,
    binding: Option<Binding>,
}

/// Owns every live match and every connection's binding.
///
/// Registries are consulted to decide which match a game id belongs to and are
/// notified when a match ends; they never see the hub itself.
pub struct SessionHub {
    config: HubConfig,
    matchmaking: Arc<MatchmakingService>,
    rooms: Arc<RoomRegistry>,
    tournaments: Arc<TournamentRegistry>,
    results: mpsc::UnboundedSender<MatchResult>,
    matches: DashMap<Uuid, Arc<LiveMatch>>,
    connections: DashMap<ConnectionId, Connection>,
    /// Identity -> game it is bound to; at most one each
    players: DashMap<Identity, Uuid>,
    next_connection: AtomicU64,
    /// Serializes quick play find-or-create
    quick_play: Mutex<()>,
}

impl SessionHub {
    pub fn new(
        config: HubConfig,
        matchmaking: Arc<MatchmakingService>,
        rooms: Arc<RoomRegistry>,
        tournaments: Arc<TournamentRegistry>,
        results: mpsc::UnboundedSender<MatchResult>,
    ) -> Self {
        Self {
            config,
            matchmaking,
            rooms,
            tournaments,
            results,
            matches: DashMap::new(),
            connections: DashMap::new(),
            players: DashMap::new(),
            next_connection: AtomicU64::new(1),
            quick_play: Mutex::new(()),
        }
    }

    /// Track a new, not yet bound connection
    pub fn register_connection(
        &self,
        identity: &str,
        email: Option<String>,
        outbound: mpsc::Sender<ServerMsg>,
    ) -> ConnectionId {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(
            id,
            Connection {
                identity: identity.to_string(),
                email,
                outbound,
                binding: None,
            },
        );
        debug!(connection = id, identity = %identity, "Connection registered");
        id
    }

    /// Route one inbound message. Failures are answered with an `error` frame.
    pub async fn handle_message(self: &Arc<Self>, conn: ConnectionId, msg: ClientMsg) {
        let outcome = match msg {
            ClientMsg::JoinGame {
                game_id,
                player_id,
                user_email,
            } => self.join_game(conn, game_id, &player_id, user_email).await,
            ClientMsg::LeaveGame => self.leave_game(conn).await,
            ClientMsg::PlayerInput { direction } => self.player_input(conn, direction),
            ClientMsg::PauseGame => self.set_paused(conn, true),
            ClientMsg::UnpauseGame => self.set_paused(conn, false),
        };

        if let Err(e) = outcome {
            debug!(connection = conn, error = %e, "Rejected client message");
            self.send(conn, ServerMsg::error(e.to_string()));
        }
    }

    /// Connection closed. Safe to call more than once; only the first call acts.
    pub async fn disconnect(self: &Arc<Self>, conn: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&conn) else {
            return;
        };
        if let Some(binding) = connection.binding {
            self.release(&connection.identity, binding).await;
        }
        info!(connection = conn, identity = %connection.identity, "Connection closed");
    }

    /// Reply to a frame that never reached the router
    pub fn send_error(&self, conn: ConnectionId, message: impl Into<String>) {
        self.send(conn, ServerMsg::error(message));
    }

    /// Game the connection is bound to
    pub fn game_of(&self, conn: ConnectionId) -> Option<Uuid> {
        self.connections
            .get(&conn)
            .and_then(|c| c.binding.map(|b| b.game_id))
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn bound_players(&self) -> usize {
        self.players.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    async fn join_game(
        self: &Arc<Self>,
        conn: ConnectionId,
        game_id: Option<Uuid>,
        player_id: &str,
        user_email: Option<String>,
    ) -> CoreResult<()> {
        let (identity, email) = {
            let connection = self
                .connections
                .get(&conn)
                .ok_or_else(|| CoreError::not_found("Unknown connection"))?;
            if connection.binding.is_some() {
                return Err(CoreError::conflict("Connection is already in a game"));
            }
            let email = user_email
                .filter(|e| !e.trim().is_empty())
                .or_else(|| connection.email.clone());
            (connection.identity.clone(), email)
        };

        if player_id != identity {
            return Err(CoreError::validation(
                "playerId does not match the authenticated user",
            ));
        }
        if self.players.contains_key(&identity) {
            return Err(CoreError::conflict("Already playing in another game"));
        }

        let (live, started) = match game_id {
            Some(game_id) => {
                let live = self.resolve_game(game_id, &identity).await?;
                let started = self.bind(conn, &live, &identity, email)?;
                (live, started)
            }
            None => match self.matchmaking.get_match_for(&identity).await {
                // Paired by the queue but joined without the id
                Some(paired) => {
                    let live = self.resolve_game(paired.id, &identity).await?;
                    let started = self.bind(conn, &live, &identity, email)?;
                    (live, started)
                }
                None => self.quick_play(conn, &identity, email)?,
            },
        };

        if started {
            info!(game_id = %live.id, owner = ?live.owner, "Both players bound, match started");
            if live.claim_loop() {
                tokio::spawn(Arc::clone(self).run_match(Arc::clone(&live)));
            }
            if live.owner == GameOwner::Matchmaking {
                self.matchmaking.mark_playing(live.id).await;
            }
        }
        Ok(())
    }

    /// Find the running simulation for a game id, or create it from whichever registry issued the id
    async fn resolve_game(&self, game_id: Uuid, identity: &str) -> CoreResult<Arc<LiveMatch>> {
        if let Some(live) = self.live(game_id) {
            return Ok(live);
        }

        let (owner, players, max_score) = if let Some(room) = self.rooms.find_by_game(game_id) {
            if room.status != RoomStatus::Playing {
                return Err(CoreError::state("Room game is no longer active"));
            }
            if !room.is_member(identity) {
                return Err(CoreError::conflict("Not a member of this room"));
            }
            let mut members = room.players.iter().map(|p| p.identity.clone());
            let players = members.next().zip(members.next());
            (GameOwner::Room { room_id: room.id }, players, room.max_score)
        } else if let Some(game) = self.tournaments.find_by_game(game_id) {
            if game.status != BracketMatchStatus::Playing {
                return Err(CoreError::state("Tournament match is no longer active"));
            }
            let seated = [&game.player1, &game.player2];
            if !seated.iter().any(|p| p.as_deref() == Some(identity)) {
                return Err(CoreError::conflict("Not a player in this match"));
            }
            (
                GameOwner::Tournament {
                    tournament_id: game.tournament_id,
                    match_id: game.match_id,
                },
                game.player1.zip(game.player2),
                game.max_score,
            )
        } else if let Some(paired) = self.matchmaking.get_match(game_id).await {
            if !paired.involves(identity) {
                return Err(CoreError::conflict("Not a player in this game"));
            }
            (
                GameOwner::Matchmaking,
                Some((paired.left.identity, paired.right.identity)),
                self.config.default_max_score,
            )
        } else {
            return Err(CoreError::not_found("Game not found"));
        };

        let (first, second) = players.ok_or_else(|| CoreError::state("Game is missing a player"))?;
        let live = self
            .matches
            .entry(game_id)
            .or_insert_with(|| {
                info!(game_id = %game_id, owner = ?owner, max_score, "Match created");
                Arc::new(LiveMatch::new(game_id, owner, Some([first, second]), max_score))
            })
            .value()
            .clone();
        Ok(live)
    }

    /// Join an open quick play match, or open a new one
    fn quick_play(
        &self,
        conn: ConnectionId,
        identity: &str,
        email: Option<String>,
    ) -> CoreResult<(Arc<LiveMatch>, bool)> {
        let _guard = self.quick_play.lock();

        let open = self
            .matches
            .iter()
            .find(|m| m.is_open_quick_play())
            .map(|m| Arc::clone(m.value()));

        let (live, created) = match open {
            Some(live) => (live, false),
            None => {
                let id = Uuid::new_v4();
                let live = Arc::new(LiveMatch::new(
                    id,
                    GameOwner::Matchmaking,
                    None,
                    self.config.default_max_score,
                ));
                self.matches.insert(id, Arc::clone(&live));
                info!(game_id = %id, "Quick play match created");
                (live, true)
            }
        };

        match self.bind(conn, &live, identity, email) {
            Ok(started) => Ok((live, started)),
            Err(e) => {
                if created {
                    self.teardown(&live);
                }
                Err(e)
            }
        }
    }

    /// Seat the connection in the match. Returns whether this bind started it.
    fn bind(
        &self,
        conn: ConnectionId,
        live: &Arc<LiveMatch>,
        identity: &str,
        email: Option<String>,
    ) -> CoreResult<bool> {
        if !live.admits(identity) {
            return Err(CoreError::conflict("Not a player in this game"));
        }
        let outbound = self
            .connections
            .get(&conn)
            .map(|c| c.outbound.clone())
            .ok_or_else(|| CoreError::not_found("Unknown connection"))?;

        match self.players.entry(identity.to_string()) {
            Entry::Occupied(_) => return Err(CoreError::conflict("Already playing in another game")),
            Entry::Vacant(slot) => {
                slot.insert(live.id);
            }
        }

        let seated = {
            let mut state = live.state.lock();
            if live.is_torn_down() || state.sim.status() == MatchStatus::Finished {
                Err(CoreError::state("Game is over"))
            } else if let Some(side) = state.sim.add_player(identity) {
                *state.seats.get_mut(side) = Some(Seat {
                    connection: conn,
                    identity: identity.to_string(),
                    outbound,
                });
                *state.roster.get_mut(side) = Some(RosterEntry {
                    identity: identity.to_string(),
                    email,
                });

                let snapshot = state.sim.snapshot();
                state.send_to(
                    side,
                    ServerMsg::GameState {
                        state: snapshot,
                        player_position: Some(side),
                    },
                );
                state.send_to(
                    side.opponent(),
                    ServerMsg::PlayerJoined {
                        player_id: identity.to_string(),
                        position: side,
                    },
                );
                Ok((side, state.sim.start()))
            } else {
                Err(CoreError::conflict("Game is full"))
            }
        };

        let (side, started) = match seated {
            Ok(seated) => seated,
            Err(e) => {
                self.players.remove_if(identity, |_, game| *game == live.id);
                return Err(e);
            }
        };

        if let Some(mut connection) = self.connections.get_mut(&conn) {
            connection.binding = Some(Binding {
                game_id: live.id,
                side,
            });
        }
        info!(game_id = %live.id, identity = %identity, side = ?side, "Player bound");
        Ok(started)
    }

    async fn leave_game(self: &Arc<Self>, conn: ConnectionId) -> CoreResult<()> {
        let (identity, binding) = {
            let mut connection = self
                .connections
                .get_mut(&conn)
                .ok_or_else(|| CoreError::not_found("Unknown connection"))?;
            let binding = connection
                .binding
                .take()
                .ok_or_else(|| CoreError::state("Not in a game"))?;
            (connection.identity.clone(), binding)
        };
        self.release(&identity, binding).await;
        Ok(())
    }

    /// Unseat an identity. Leaving a running match forfeits it.
    async fn release(self: &Arc<Self>, identity: &str, binding: Binding) {
        let Some(live) = self.live(binding.game_id) else {
            self.players.remove_if(identity, |_, game| *game == binding.game_id);
            return;
        };

        let (forfeited, started, empty, opponent) = {
            let mut state = live.state.lock();
            let running = matches!(state.sim.status(), MatchStatus::Playing | MatchStatus::Paused);
            state.sim.remove_player(identity);
            *state.seats.get_mut(binding.side) = None;
            state.send_to(
                binding.side.opponent(),
                ServerMsg::PlayerLeft {
                    player_id: identity.to_string(),
                },
            );
            if running {
                state.broadcast_state();
            }
            (
                running,
                state.sim.status() != MatchStatus::Waiting,
                state.sim.is_empty(),
                state.sim.player(binding.side.opponent()).map(str::to_string),
            )
        };
        self.players.remove_if(identity, |_, game| *game == live.id);

        if forfeited {
            info!(
                game_id = %live.id,
                identity = %identity,
                opponent = ?opponent,
                "Player left a running match, forfeit"
            );
            self.finish_match(&live).await;
        } else if !started && live.owner == GameOwner::Matchmaking {
            self.matchmaking.remove_match(live.id).await;
        }

        if empty {
            self.teardown(&live);
        }
    }

    fn player_input(&self, conn: ConnectionId, direction: Direction) -> CoreResult<()> {
        let (identity, live) = self.bound_match(conn)?;
        if !live.state.lock().sim.apply_input(&identity, direction) {
            debug!(game_id = %live.id, identity = %identity, "Input ignored");
        }
        Ok(())
    }

    fn set_paused(&self, conn: ConnectionId, paused: bool) -> CoreResult<()> {
        let (identity, live) = self.bound_match(conn)?;
        let mut state = live.state.lock();
        let changed = if paused {
            state.sim.pause()
        } else {
            state.sim.unpause()
        };
        if !changed {
            return Err(CoreError::state(if paused {
                "Game is not running"
            } else {
                "Game is not paused"
            }));
        }
        state.broadcast_state();
        info!(game_id = %live.id, identity = %identity, paused, "Pause toggled");
        Ok(())
    }

    fn bound_match(&self, conn: ConnectionId) -> CoreResult<(Identity, Arc<LiveMatch>)> {
        let (identity, binding) = self
            .connections
            .get(&conn)
            .and_then(|c| c.binding.map(|b| (c.identity.clone(), b)))
            .ok_or_else(|| CoreError::state("Not in a game"))?;
        let live = self
            .live(binding.game_id)
            .ok_or_else(|| CoreError::state("Not in a game"))?;
        Ok((identity, live))
    }

    /// Fixed-rate tick and broadcast until the match finishes or is torn down
    async fn run_match(self: Arc<Self>, live: Arc<LiveMatch>) {
        debug!(game_id = %live.id, tick_rate = self.config.tick_rate, "Match loop started");

        let mut ticker = interval(tick_duration(self.config.tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timer = Timer::new();

        loop {
            ticker.tick().await;
            if live.is_torn_down() {
                return;
            }

            let finished = {
                let mut state = live.state.lock();
                let outcome = state.sim.tick(timer.lap_secs());
                if outcome.finished {
                    debug!(game_id = %live.id, "Score limit reached");
                }
                if let Some(scorer) = outcome.goal {
                    let scores = state.sim.scores();
                    debug!(
                        game_id = %live.id,
                        scorer = ?scorer,
                        left = scores.left,
                        right = scores.right,
                        "Goal"
                    );
                }
                state.broadcast_state();
                state.sim.status() == MatchStatus::Finished
            };

            if finished {
                break;
            }
        }

        self.finish_match(&live).await;
        self.teardown(&live);
        debug!(game_id = %live.id, "Match loop stopped");
    }

    /// Report the result and notify the owner, once per match
    async fn finish_match(&self, live: &LiveMatch) {
        if !live.claim_finish() {
            return;
        }

        let outcome = {
            let state = live.state.lock();
            let scores = state.sim.scores();
            let max_score = state.sim.max_score();
            let forfeit = state.sim.was_forfeited();
            state.sim.winner().and_then(|side| {
                let winner = state.roster.get(side).clone()?;
                let loser = state.roster.get(side.opponent()).clone()?;
                Some((winner, loser, scores, max_score, forfeit))
            })
        };

        let Some((winner, loser, scores, max_score, forfeit)) = outcome else {
            warn!(game_id = %live.id, "Match finished without a winner");
            if live.owner == GameOwner::Matchmaking {
                self.matchmaking.remove_match(live.id).await;
            }
            return;
        };

        info!(
            game_id = %live.id,
            winner = %winner.identity,
            loser = %loser.identity,
            left = scores.left,
            right = scores.right,
            max_score,
            forfeit,
            "Match finished"
        );

        let result = MatchResult {
            winner_email: winner.contact(),
            loser_email: loser.contact(),
            game_type: live.owner.game_type(),
            game_id: live.id,
        };
        if self.results.send(result).is_err() {
            error!(game_id = %live.id, "Result channel closed, dropping result");
        }

        match live.owner {
            GameOwner::Matchmaking => {
                self.matchmaking.remove_match(live.id).await;
            }
            GameOwner::Room { room_id } => {
                if let Err(e) = self.rooms.record_result(room_id, &winner.identity) {
                    warn!(game_id = %live.id, room_id = %room_id, error = %e, "Could not record room result");
                }
            }
            GameOwner::Tournament {
                tournament_id,
                match_id,
            } => {
                if let Err(e) =
                    self.tournaments
                        .record_match_result(tournament_id, match_id, &winner.identity)
                {
                    warn!(
                        game_id = %live.id,
                        tournament_id = %tournament_id,
                        error = %e,
                        "Could not record tournament result"
                    );
                }
            }
        }
    }

    /// Drop the match and unbind whoever is still seated, leaving their connections open
    fn teardown(&self, live: &LiveMatch) {
        if !live.claim_teardown() {
            return;
        }
        self.matches.remove(&live.id);

        let seated: Vec<(ConnectionId, Identity)> = {
            let mut state = live.state.lock();
            Side::BOTH
                .into_iter()
                .filter_map(|side| state.seats.get_mut(side).take())
                .map(|seat| (seat.connection, seat.identity))
                .collect()
        };

        for (conn, identity) in seated {
            if let Some(mut connection) = self.connections.get_mut(&conn) {
                if connection.binding.is_some_and(|b| b.game_id == live.id) {
                    connection.binding = None;
                }
            }
            self.players.remove_if(&identity, |_, game| *game == live.id);
        }
        debug!(game_id = %live.id, "Match torn down");
    }

    fn live(&self, game_id: Uuid) -> Option<Arc<LiveMatch>> {
        self.matches.get(&game_id).map(|m| Arc::clone(m.value()))
    }

    fn send(&self, conn: ConnectionId, msg: ServerMsg) {
        if let Some(connection) = self.connections.get(&conn) {
            push(&connection.outbound, msg);
        }
    }
}

impl LiveMatches for SessionHub {
    fn is_in_live_match(&self, identity: &str) -> bool {
        self.players.contains_key(identity)
    }
}
