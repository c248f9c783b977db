//! Invite-coded single-elimination tournaments

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::game::{Identity, MAX_SCORE_LIMIT};
use crate::rooms::code::{normalize_code, random_code};

use super::bracket::{self, Bracket, BracketMatch, BracketMatchStatus};

pub const MIN_TOURNAMENT_SIZE: usize = 2;
pub const MAX_TOURNAMENT_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Waiting,
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub identity: Identity,
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tournament {
    pub id: Uuid,
    pub name: String,
    pub size: usize,
    pub max_score: u32,
    pub join_code: String,
    pub owner: Identity,
    pub participants: Vec<Participant>,
    pub bracket: Bracket,
    /// 1-based; 0 until started
    pub current_round: u32,
    pub status: TournamentStatus,
    pub winner: Option<Identity>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Tournament {
    pub fn is_participant(&self, identity: &str) -> bool {
        self.participants.iter().any(|p| p.identity == identity)
    }

    fn current_round_index(&self) -> Option<usize> {
        (self.current_round as usize).checked_sub(1)
    }

    /// Find a match of the current round, mutable
    fn current_match_mut(&mut self, match_id: Uuid) -> CoreResult<&mut BracketMatch> {
        let (round, index) = bracket::position_of(&self.bracket, match_id)
            .ok_or_else(|| CoreError::not_found("Match not found"))?;
        if Some(round) != self.current_round_index() {
            return Err(CoreError::state("Match is not in the current round"));
        }
        Ok(&mut self.bracket[round][index])
    }

    /// Advance rounds while the current one is fully completed
    fn settle_rounds(&mut self) {
        while let Some(round) = self.current_round_index() {
            if !bracket::round_complete(&self.bracket, round) {
                return;
            }
            if round + 1 >= self.bracket.len() {
                self.status = TournamentStatus::Completed;
                self.winner = bracket::champion(&self.bracket).cloned();
                self.completed_at = Some(Utc::now());
                info!(
                    tournament_id = %self.id,
                    winner = ?self.winner,
                    "Tournament completed"
                );
                return;
            }
            self.current_round += 1;
            bracket::open_round(&mut self.bracket, round + 1);
            info!(tournament_id = %self.id, round = self.current_round, "Tournament round advanced");
        }
    }
}

/// Where a tournament game belongs
#[derive(Debug, Clone)]
pub struct TournamentGame {
    pub tournament_id: Uuid,
    pub match_id: Uuid,
    pub max_score: u32,
    pub status: BracketMatchStatus,
    pub player1: Option<Identity>,
    pub player2: Option<Identity>,
}

/// Result of a participant leaving
#[derive(Debug, Clone)]
pub enum TournamentLeave {
    /// The owner left, tournament removed
    Deleted,
    Left(Tournament),
}

/// All tournaments, keyed by id, plus the invite code index
pub struct TournamentRegistry {
    tournaments: DashMap<Uuid, Tournament>,
    codes: DashMap<String, Uuid>,
    retention: Duration,
}

impl TournamentRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            tournaments: DashMap::new(),
            codes: DashMap::new(),
            retention,
        }
    }

    pub fn create(
        &self,
        name: &str,
        size: usize,
        max_score: u32,
        owner: &str,
        display_name: &str,
    ) -> CoreResult<Tournament> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 64 {
            return Err(CoreError::validation("Tournament name must be 1-64 characters"));
        }
        if !(MIN_TOURNAMENT_SIZE..=MAX_TOURNAMENT_SIZE).contains(&size) {
            return Err(CoreError::validation(format!(
                "Size must be between {} and {}",
                MIN_TOURNAMENT_SIZE, MAX_TOURNAMENT_SIZE
            )));
        }
        if max_score == 0 || max_score > MAX_SCORE_LIMIT {
            return Err(CoreError::validation(format!(
                "Max score must be between 1 and {}",
                MAX_SCORE_LIMIT
            )));
        }

        let id = Uuid::new_v4();
        let mut rng = rand::thread_rng();
        let join_code = loop {
            let code = random_code(&mut rng);
            if let Entry::Vacant(slot) = self.codes.entry(code.clone()) {
                slot.insert(id);
                break code;
            }
        };

        let now = Utc::now();
        let tournament = Tournament {
            id,
            name: name.to_string(),
            size,
            max_score,
            join_code,
            owner: owner.to_string(),
            participants: vec![Participant {
                identity: owner.to_string(),
                display_name: display_name.to_string(),
                joined_at: now,
            }],
            bracket: Vec::new(),
            current_round: 0,
            status: TournamentStatus::Waiting,
            winner: None,
            created_at: now,
            completed_at: None,
        };
        self.tournaments.insert(id, tournament.clone());

        info!(tournament_id = %id, code = %tournament.join_code, size, "Tournament created");
        Ok(tournament)
    }

    pub fn join_by_code(&self, code: &str, identity: &str, display_name: &str) -> CoreResult<Tournament> {
        let code = normalize_code(code)?;
        let id = self
            .codes
            .get(&code)
            .map(|entry| *entry.value())
            .ok_or_else(|| CoreError::not_found("No tournament with that code"))?;
        self.join(id, identity, display_name)
    }

    pub fn join(&self, tournament_id: Uuid, identity: &str, display_name: &str) -> CoreResult<Tournament> {
        let mut t = self.get_mut(tournament_id)?;
        if t.status != TournamentStatus::Waiting {
            return Err(CoreError::state("Tournament already started"));
        }
        if t.is_participant(identity) {
            return Err(CoreError::conflict("Already a participant"));
        }
        if t.participants.len() >= t.size {
            return Err(CoreError::conflict("Tournament is full"));
        }

        t.participants.push(Participant {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            joined_at: Utc::now(),
        });
        info!(tournament_id = %tournament_id, identity = %identity, "Joined tournament");
        Ok(t.clone())
    }

    /// Only while waiting. The owner leaving removes the tournament.
    pub fn leave(&self, tournament_id: Uuid, identity: &str) -> CoreResult<TournamentLeave> {
        {
            let mut t = self.get_mut(tournament_id)?;
            if t.status != TournamentStatus::Waiting {
                return Err(CoreError::state("Cannot leave a tournament that has started"));
            }
            if !t.is_participant(identity) {
                return Err(CoreError::conflict("Not a participant"));
            }
            if t.owner != identity {
                t.participants.retain(|p| p.identity != identity);
                info!(tournament_id = %tournament_id, identity = %identity, "Left tournament");
                return Ok(TournamentLeave::Left(t.clone()));
            }
        }

        if let Some((_, t)) = self.tournaments.remove(&tournament_id) {
            self.codes.remove(&t.join_code);
        }
        info!(tournament_id = %tournament_id, "Owner left, tournament removed");
        Ok(TournamentLeave::Deleted)
    }

    /// Seed randomly and build the bracket. Owner only.
    pub fn start(&self, tournament_id: Uuid, requester: &str) -> CoreResult<Tournament> {
        let mut t = self.get_mut(tournament_id)?;
        if t.owner != requester {
            return Err(CoreError::conflict("Only the owner can start the tournament"));
        }
        if t.status != TournamentStatus::Waiting {
            return Err(CoreError::state("Tournament already started"));
        }
        if t.participants.len() < MIN_TOURNAMENT_SIZE {
            return Err(CoreError::state("At least 2 participants are needed"));
        }

        let mut seeded: Vec<Identity> = t.participants.iter().map(|p| p.identity.clone()).collect();
        seeded.shuffle(&mut rand::thread_rng());

        t.bracket = bracket::seed(&seeded);
        t.current_round = 1;
        t.status = TournamentStatus::Active;
        t.settle_rounds();

        info!(
            tournament_id = %tournament_id,
            participants = seeded.len(),
            rounds = t.bracket.len(),
            "Tournament started"
        );
        Ok(t.clone())
    }

    pub fn set_player_ready(&self, tournament_id: Uuid, match_id: Uuid, identity: &str) -> CoreResult<BracketMatch> {
        self.set_ready_flag(tournament_id, match_id, identity, true)
    }

    pub fn set_player_not_ready(&self, tournament_id: Uuid, match_id: Uuid, identity: &str) -> CoreResult<BracketMatch> {
        self.set_ready_flag(tournament_id, match_id, identity, false)
    }

    fn set_ready_flag(
        &self,
        tournament_id: Uuid,
        match_id: Uuid,
        identity: &str,
        ready: bool,
    ) -> CoreResult<BracketMatch> {
        let mut t = self.get_mut(tournament_id)?;
        let m = t.current_match_mut(match_id)?;
        if !matches!(m.status, BracketMatchStatus::Lobby | BracketMatchStatus::Ready) {
            return Err(CoreError::state("Match is not open for ready check"));
        }

        if m.player1.as_deref() == Some(identity) {
            m.player1_ready = ready;
        } else if m.player2.as_deref() == Some(identity) {
            m.player2_ready = ready;
        } else {
            return Err(CoreError::conflict("Not a player in this match"));
        }

        m.status = if m.both_ready() {
            BracketMatchStatus::Ready
        } else {
            BracketMatchStatus::Lobby
        };
        debug!(match_id = %match_id, identity = %identity, ready, "Tournament ready flag changed");
        Ok(m.clone())
    }

    /// Start a tournament match. Calling again while it is playing returns the same id.
    pub fn create_match_game(&self, tournament_id: Uuid, match_id: Uuid, identity: &str) -> CoreResult<Uuid> {
        let mut t = self.get_mut(tournament_id)?;
        let m = t.current_match_mut(match_id)?;
        if !m.has_player(identity) {
            return Err(CoreError::conflict("Not a player in this match"));
        }

        match (m.status, m.game_id) {
            (BracketMatchStatus::Playing, Some(game_id)) => Ok(game_id),
            (BracketMatchStatus::Ready, _) if m.both_ready() => {
                let game_id = Uuid::new_v4();
                m.status = BracketMatchStatus::Playing;
                m.game_id = Some(game_id);
                info!(tournament_id = %tournament_id, match_id = %match_id, game_id = %game_id, "Tournament game created");
                Ok(game_id)
            }
            _ => Err(CoreError::state("Both players must be ready")),
        }
    }

    /// Complete a match, advance its winner and, when the round is done, the tournament
    pub fn record_match_result(&self, tournament_id: Uuid, match_id: Uuid, winner: &str) -> CoreResult<Tournament> {
        let mut t = self.get_mut(tournament_id)?;
        let (round, index) = bracket::position_of(&t.bracket, match_id)
            .ok_or_else(|| CoreError::not_found("Match not found"))?;
        {
            let m = t.current_match_mut(match_id)?;
            if !m.is_live() {
                return Err(CoreError::state("Match is not in progress"));
            }
            if !m.has_player(winner) {
                return Err(CoreError::validation("Winner is not a player in this match"));
            }
        }

        bracket::complete(&mut t.bracket, round, index, winner.to_string(), false);
        info!(tournament_id = %tournament_id, match_id = %match_id, winner = %winner, "Tournament match completed");

        t.settle_rounds();
        Ok(t.clone())
    }

    /// Result reported by a client; the reporter must be one of the two players
    pub fn report_match_result(
        &self,
        tournament_id: Uuid,
        match_id: Uuid,
        winner: &str,
        requester: &str,
    ) -> CoreResult<Tournament> {
        {
            let t = self.get(tournament_id)?;
            let is_player = t
                .bracket
                .iter()
                .flatten()
                .any(|m| m.id == match_id && m.has_player(requester));
            if !is_player {
                return Err(CoreError::conflict("Not a player in this match"));
            }
        }
        self.record_match_result(tournament_id, match_id, winner)
    }

    /// The identity's live match in the current round
    pub fn get_player_current_match(&self, tournament_id: Uuid, identity: &str) -> CoreResult<Option<BracketMatch>> {
        let t = self.get(tournament_id)?;
        let Some(round) = t.current_round_index() else {
            return Ok(None);
        };
        Ok(t.bracket[round]
            .iter()
            .find(|m| m.is_live() && m.has_player(identity))
            .cloned())
    }

    pub fn current_matches(&self, tournament_id: Uuid) -> CoreResult<Vec<BracketMatch>> {
        let t = self.get(tournament_id)?;
        Ok(t.current_round_index()
            .and_then(|round| t.bracket.get(round).cloned())
            .unwrap_or_default())
    }

    /// Tournament match whose game has this id
    pub fn find_by_game(&self, game_id: Uuid) -> Option<TournamentGame> {
        self.tournaments.iter().find_map(|entry| {
            let t = entry.value();
            t.bracket.iter().flatten().find(|m| m.game_id == Some(game_id)).map(|m| TournamentGame {
                tournament_id: t.id,
                match_id: m.id,
                max_score: t.max_score,
                status: m.status,
                player1: m.player1.clone(),
                player2: m.player2.clone(),
            })
        })
    }

    pub fn get(&self, tournament_id: Uuid) -> CoreResult<Tournament> {
        self.tournaments
            .get(&tournament_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| CoreError::not_found("Tournament not found"))
    }

    /// Tournaments not yet completed, newest first
    pub fn list(&self) -> Vec<Tournament> {
        let mut list: Vec<Tournament> = self
            .tournaments
            .iter()
            .filter(|t| t.status != TournamentStatus::Completed)
            .map(|t| t.value().clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Drop completed tournaments older than the retention window
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        let expired: Vec<Uuid> = self
            .tournaments
            .iter()
            .filter(|t| {
                t.status == TournamentStatus::Completed
                    && t.completed_at.is_some_and(|at| now - at >= retention)
            })
            .map(|t| t.id)
            .collect();

        let mut removed = 0;
        for id in expired {
            let taken = self.tournaments.remove_if(&id, |_, t| t.status == TournamentStatus::Completed);
            if let Some((_, t)) = taken {
                self.codes.remove(&t.join_code);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept completed tournaments");
        }
        removed
    }

    pub fn tournament_count(&self) -> usize {
        self.tournaments.len()
    }

    fn get_mut(&self, tournament_id: Uuid) -> CoreResult<dashmap::mapref::one::RefMut<'_, Uuid, Tournament>> {
        self.tournaments
            .get_mut(&tournament_id)
            .ok_or_else(|| CoreError::not_found("Tournament not found"))
    }
}

impl Default for TournamentRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn filled(registry: &TournamentRegistry, size: usize) -> Tournament {
        let t = assert_ok!(registry.create("Cup", size, 3, "p1", "P1"));
        for i in 2..=size {
            let id = format!("p{}", i);
            assert_ok!(registry.join(t.id, &id, &id));
        }
        registry.get(t.id).unwrap()
    }

    fn play(registry: &TournamentRegistry, tid: Uuid, m: &BracketMatch) -> Uuid {
        let p1 = m.player1.clone().unwrap();
        let p2 = m.player2.clone().unwrap();
        assert_ok!(registry.set_player_ready(tid, m.id, &p1));
        assert_ok!(registry.set_player_ready(tid, m.id, &p2));
        assert_ok!(registry.create_match_game(tid, m.id, &p1))
    }

    #[test]
    fn test_create_validates() {
        let registry = TournamentRegistry::default();
        assert_err!(registry.create("", 4, 3, "p1", "P1"));
        assert_err!(registry.create("Cup", 1, 3, "p1", "P1"));
        assert_err!(registry.create("Cup", 33, 3, "p1", "P1"));
        assert_err!(registry.create("Cup", 4, 0, "p1", "P1"));

        let t = assert_ok!(registry.create("Cup", 4, 3, "p1", "P1"));
        assert_eq!(t.participants.len(), 1);
        assert_eq!(t.status, TournamentStatus::Waiting);
        assert_eq!(t.join_code.len(), 5);
    }

    #[test]
    fn test_join_by_code_and_capacity() {
        let registry = TournamentRegistry::default();
        let t = assert_ok!(registry.create("Cup", 2, 3, "p1", "P1"));

        let lower = t.join_code.to_lowercase();
        assert_ok!(registry.join_by_code(&lower, "p2", "P2"));
        assert_eq!(
            registry.join(t.id, "p2", "P2").unwrap_err(),
            CoreError::conflict("Already a participant")
        );
        assert_err!(registry.join(t.id, "p3", "P3"));
        assert_err!(registry.join_by_code("ZZZZZ", "p3", "P3"));
    }

    #[test]
    fn test_start_requires_owner_and_players() {
        let registry = TournamentRegistry::default();
        let t = assert_ok!(registry.create("Cup", 4, 3, "p1", "P1"));
        assert_err!(registry.start(t.id, "p1"));

        assert_ok!(registry.join(t.id, "p2", "P2"));
        assert_err!(registry.start(t.id, "p2"));

        let started = assert_ok!(registry.start(t.id, "p1"));
        assert_eq!(started.status, TournamentStatus::Active);
        assert_eq!(started.current_round, 1);
        assert_err!(registry.join(t.id, "p3", "P3"));
        assert_err!(registry.leave(t.id, "p2"));
    }

    #[test]
    fn test_four_player_tournament_runs_to_champion() {
        let registry = TournamentRegistry::default();
        let t = filled(&registry, 4);
        let t = assert_ok!(registry.start(t.id, "p1"));
        assert_eq!(t.bracket.len(), 2);

        let round1 = assert_ok!(registry.current_matches(t.id));
        assert_eq!(round1.len(), 2);
        assert!(round1.iter().all(|m| m.status == BracketMatchStatus::Lobby));

        let mut finalists = Vec::new();
        for m in &round1 {
            play(&registry, t.id, m);
            let winner = m.player1.clone().unwrap();
            assert_ok!(registry.record_match_result(t.id, m.id, &winner));
            finalists.push(winner);
        }

        let t = registry.get(t.id).unwrap();
        assert_eq!(t.current_round, 2);
        let final_match = assert_ok!(registry.current_matches(t.id)).remove(0);
        assert_eq!(final_match.status, BracketMatchStatus::Lobby);
        assert_eq!(final_match.player1.as_ref(), Some(&finalists[0]));
        assert_eq!(final_match.player2.as_ref(), Some(&finalists[1]));

        play(&registry, t.id, &final_match);
        let done = assert_ok!(registry.record_match_result(t.id, final_match.id, &finalists[1]));
        assert_eq!(done.status, TournamentStatus::Completed);
        assert_eq!(done.winner.as_ref(), Some(&finalists[1]));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_create_match_game_needs_ready_and_is_idempotent() {
        let registry = TournamentRegistry::default();
        let t = filled(&registry, 2);
        assert_ok!(registry.start(t.id, "p1"));
        let m = assert_ok!(registry.current_matches(t.id)).remove(0);
        let p1 = m.player1.clone().unwrap();
        let p2 = m.player2.clone().unwrap();

        assert_ok!(registry.set_player_ready(t.id, m.id, &p1));
        assert_err!(registry.create_match_game(t.id, m.id, &p1));

        assert_ok!(registry.set_player_not_ready(t.id, m.id, &p1));
        assert_ok!(registry.set_player_ready(t.id, m.id, &p1));
        let ready = assert_ok!(registry.set_player_ready(t.id, m.id, &p2));
        assert_eq!(ready.status, BracketMatchStatus::Ready);

        let first = assert_ok!(registry.create_match_game(t.id, m.id, &p1));
        let second = assert_ok!(registry.create_match_game(t.id, m.id, &p2));
        assert_eq!(first, second);
        assert_err!(registry.create_match_game(t.id, m.id, "stranger"));

        let found = registry.find_by_game(first).unwrap();
        assert_eq!(found.match_id, m.id);
        assert_eq!(found.max_score, 3);
    }

    #[test]
    fn test_odd_field_gives_bye() {
        let registry = TournamentRegistry::default();
        let t = filled(&registry, 3);
        let t = assert_ok!(registry.start(t.id, "p1"));

        let byes = t.bracket[0].iter().filter(|m| m.bye).count();
        assert_eq!(byes, 1);
        let live: Vec<_> = assert_ok!(registry.current_matches(t.id))
            .into_iter()
            .filter(|m| m.is_live())
            .collect();
        assert_eq!(live.len(), 1);
    }

    #[test]
    fn test_report_result_checks_requester_and_winner() {
        let registry = TournamentRegistry::default();
        let t = filled(&registry, 2);
        assert_ok!(registry.start(t.id, "p1"));
        let m = assert_ok!(registry.current_matches(t.id)).remove(0);
        play(&registry, t.id, &m);

        assert_err!(registry.report_match_result(t.id, m.id, "p1", "stranger"));
        assert_eq!(
            registry.report_match_result(t.id, m.id, "stranger", "p1").unwrap_err(),
            CoreError::validation("Winner is not a player in this match")
        );
        assert_ok!(registry.report_match_result(t.id, m.id, "p2", "p1"));
        assert_err!(registry.record_match_result(t.id, m.id, "p2"));
    }

    #[test]
    fn test_player_current_match() {
        let registry = TournamentRegistry::default();
        let t = filled(&registry, 4);
        assert!(assert_ok!(registry.get_player_current_match(t.id, "p1")).is_none());

        assert_ok!(registry.start(t.id, "p1"));
        let m = assert_ok!(registry.get_player_current_match(t.id, "p3")).unwrap();
        assert!(m.has_player("p3"));
        assert!(assert_ok!(registry.get_player_current_match(t.id, "nobody")).is_none());
    }

    #[test]
    fn test_owner_leaving_deletes() {
        let registry = TournamentRegistry::default();
        let t = filled(&registry, 3);
        assert!(matches!(
            assert_ok!(registry.leave(t.id, "p2")),
            TournamentLeave::Left(ref left) if left.participants.len() == 2
        ));
        assert!(matches!(assert_ok!(registry.leave(t.id, "p1")), TournamentLeave::Deleted));
        assert_err!(registry.get(t.id));
        assert_err!(registry.join_by_code(&t.join_code, "p9", "P9"));
    }

    #[test]
    fn test_sweep_removes_completed_only() {
        let registry = TournamentRegistry::new(Duration::ZERO);
        let waiting = assert_ok!(registry.create("Open", 4, 3, "w1", "W1"));

        let t = filled(&registry, 2);
        assert_ok!(registry.start(t.id, "p1"));
        let m = assert_ok!(registry.current_matches(t.id)).remove(0);
        play(&registry, t.id, &m);
        assert_ok!(registry.record_match_result(t.id, m.id, "p1"));

        assert_eq!(registry.sweep(), 1);
        assert_ok!(registry.get(waiting.id));
        assert_err!(registry.get(t.id));
    }
}
