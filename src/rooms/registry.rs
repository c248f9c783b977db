//! Private rooms joined by a 5-character code

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::game::{Identity, MAX_SCORE_LIMIT};
use crate::ws::protocol::Side;

use super::code::{normalize_code, unique_code};

pub const MAX_ROOM_PLAYERS: usize = 2;
pub const MAX_ROOM_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Ready,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    pub identity: Identity,
    pub display_name: String,
    pub side: Option<Side>,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub join_code: String,
    pub name: String,
    pub max_score: u32,
    pub owner: Identity,
    pub players: Vec<RoomPlayer>,
    pub status: RoomStatus,
    pub game_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Room {
    pub fn is_member(&self, identity: &str) -> bool {
        self.players.iter().any(|p| p.identity == identity)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_ROOM_PLAYERS
    }

    fn player_mut(&mut self, identity: &str) -> Option<&mut RoomPlayer> {
        self.players.iter_mut().find(|p| p.identity == identity)
    }

    fn free_side(&self) -> Side {
        if self.players.iter().any(|p| p.side == Some(Side::Left)) {
            Side::Right
        } else {
            Side::Left
        }
    }

    fn has_started(&self) -> bool {
        matches!(self.status, RoomStatus::Playing | RoomStatus::Finished)
    }

    /// Ready exactly when both seats are taken and both players are ready
    fn refresh_ready(&mut self) {
        if self.has_started() {
            return;
        }
        self.status = if self.players.len() == MAX_ROOM_PLAYERS && self.players.iter().all(|p| p.ready) {
            RoomStatus::Ready
        } else {
            RoomStatus::Waiting
        };
    }
}

/// Result of a player leaving
#[derive(Debug, Clone)]
pub enum RoomLeave {
    /// Owner left or nobody is left
    Deleted,
    Left(Room),
}

#[derive(Default)]
struct RoomBook {
    rooms: HashMap<Uuid, Room>,
    codes: HashMap<String, Uuid>,
    members: HashMap<Identity, Uuid>,
}

impl RoomBook {
    fn room_mut(&mut self, room_id: Uuid) -> CoreResult<&mut Room> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| CoreError::not_found("Room not found"))
    }

    fn delete(&mut self, room_id: Uuid) -> Option<Room> {
        let room = self.rooms.remove(&room_id)?;
        self.codes.remove(&room.join_code);
        for player in &room.players {
            self.members.remove(&player.identity);
        }
        Some(room)
    }
}

/// All rooms. Each operation runs under one lock, so it either applies fully or not at all.
pub struct RoomRegistry {
    book: RwLock<RoomBook>,
    retention: Duration,
}

impl RoomRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            book: RwLock::new(RoomBook::default()),
            retention,
        }
    }

    pub fn create_room(
        &self,
        name: &str,
        max_score: u32,
        owner: &str,
        display_name: &str,
    ) -> CoreResult<Room> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(CoreError::validation(format!(
                "Room name must be 1-{} characters",
                MAX_ROOM_NAME_LEN
            )));
        }
        if max_score == 0 || max_score > MAX_SCORE_LIMIT {
            return Err(CoreError::validation(format!(
                "Max score must be between 1 and {}",
                MAX_SCORE_LIMIT
            )));
        }

        let mut book = self.book.write();
        if book.members.contains_key(owner) {
            return Err(CoreError::conflict("Already in a room"));
        }

        let join_code = unique_code(|c| book.codes.contains_key(c));
        let room = Room {
            id: Uuid::new_v4(),
            join_code: join_code.clone(),
            name: name.to_string(),
            max_score,
            owner: owner.to_string(),
            players: vec![RoomPlayer {
                identity: owner.to_string(),
                display_name: display_name.to_string(),
                side: Some(Side::Left),
                ready: false,
            }],
            status: RoomStatus::Waiting,
            game_id: None,
            created_at: Utc::now(),
            finished_at: None,
        };

        book.codes.insert(join_code, room.id);
        book.members.insert(owner.to_string(), room.id);
        book.rooms.insert(room.id, room.clone());

        info!(room_id = %room.id, code = %room.join_code, owner = %owner, "Room created");
        Ok(room)
    }

    pub fn join_by_code(&self, code: &str, identity: &str, display_name: &str) -> CoreResult<Room> {
        let code = normalize_code(code)?;

        let mut book = self.book.write();
        let room_id = *book
            .codes
            .get(&code)
            .ok_or_else(|| CoreError::not_found("No room with that code"))?;
        let in_other_room = book.members.get(identity).is_some_and(|id| *id != room_id);

        let room = book.room_mut(room_id)?;
        if room.is_member(identity) {
            return Err(CoreError::conflict("Already in this room"));
        }
        if in_other_room {
            return Err(CoreError::conflict("Already in another room"));
        }
        if room.has_started() {
            return Err(CoreError::conflict("Game already started"));
        }
        if room.is_full() {
            return Err(CoreError::conflict("Room is full"));
        }

        let side = room.free_side();
        room.players.push(RoomPlayer {
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            side: Some(side),
            ready: false,
        });
        room.refresh_ready();
        let snapshot = room.clone();

        book.members.insert(identity.to_string(), room_id);
        info!(room_id = %room_id, identity = %identity, "Player joined room");
        Ok(snapshot)
    }

    pub fn get(&self, room_id: Uuid) -> Option<Room> {
        self.book.read().rooms.get(&room_id).cloned()
    }

    /// The room an identity currently belongs to
    pub fn room_for(&self, identity: &str) -> Option<Room> {
        let book = self.book.read();
        let room_id = book.members.get(identity)?;
        book.rooms.get(room_id).cloned()
    }

    /// Rooms still waiting for a second player
    pub fn list_available(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .book
            .read()
            .rooms
            .values()
            .filter(|r| r.status == RoomStatus::Waiting && r.players.len() < MAX_ROOM_PLAYERS)
            .cloned()
            .collect();
        rooms.sort_by_key(|r| r.created_at);
        rooms
    }

    pub fn set_ready(&self, room_id: Uuid, identity: &str) -> CoreResult<Room> {
        self.set_ready_flag(room_id, identity, true)
    }

    pub fn set_unready(&self, room_id: Uuid, identity: &str) -> CoreResult<Room> {
        self.set_ready_flag(room_id, identity, false)
    }

    fn set_ready_flag(&self, room_id: Uuid, identity: &str, ready: bool) -> CoreResult<Room> {
        let mut book = self.book.write();
        let room = book.room_mut(room_id)?;
        if room.has_started() {
            return Err(CoreError::state("Game already started"));
        }
        let player = room
            .player_mut(identity)
            .ok_or_else(|| CoreError::conflict("Not a member of this room"))?;
        player.ready = ready;
        room.refresh_ready();

        debug!(room_id = %room_id, identity = %identity, ready, status = ?room.status, "Ready flag changed");
        Ok(room.clone())
    }

    /// Start the room's game. Calling again while it is playing returns the same id.
    pub fn create_game(&self, room_id: Uuid, identity: &str) -> CoreResult<Uuid> {
        let mut book = self.book.write();
        let room = book.room_mut(room_id)?;
        if !room.is_member(identity) {
            return Err(CoreError::conflict("Not a member of this room"));
        }

        match (room.status, room.game_id) {
            (RoomStatus::Playing, Some(game_id)) => Ok(game_id),
            (RoomStatus::Ready, _) => {
                let game_id = Uuid::new_v4();
                room.status = RoomStatus::Playing;
                room.game_id = Some(game_id);
                info!(room_id = %room_id, game_id = %game_id, "Room game created");
                Ok(game_id)
            }
            _ => Err(CoreError::state("Both players must be ready")),
        }
    }

    /// Room whose current game has this id
    pub fn find_by_game(&self, game_id: Uuid) -> Option<Room> {
        self.book
            .read()
            .rooms
            .values()
            .find(|r| r.game_id == Some(game_id))
            .cloned()
    }

    /// Game over: back to the lobby for a rematch
    pub fn record_result(&self, room_id: Uuid, winner: &str) -> CoreResult<Room> {
        let mut book = self.book.write();
        let room = book.room_mut(room_id)?;
        if room.game_id.is_none() {
            return Err(CoreError::state("No game in progress"));
        }

        room.status = RoomStatus::Waiting;
        room.game_id = None;
        room.finished_at = None;
        for player in &mut room.players {
            player.ready = false;
        }

        info!(room_id = %room_id, winner = %winner, "Room result recorded");
        Ok(room.clone())
    }

    pub fn leave(&self, room_id: Uuid, identity: &str) -> CoreResult<RoomLeave> {
        let mut book = self.book.write();
        let room = book.room_mut(room_id)?;
        if !room.is_member(identity) {
            return Err(CoreError::conflict("Not a member of this room"));
        }

        if room.owner == identity {
            book.delete(room_id);
            info!(room_id = %room_id, "Owner left, room deleted");
            return Ok(RoomLeave::Deleted);
        }

        room.players.retain(|p| p.identity != identity);
        if room.status == RoomStatus::Playing {
            // The hub sees the disconnect and records the forfeit
            room.status = RoomStatus::Finished;
            room.finished_at = Some(Utc::now());
        }
        for player in &mut room.players {
            player.ready = false;
        }
        room.refresh_ready();

        let outcome = if room.players.is_empty() {
            book.delete(room_id);
            RoomLeave::Deleted
        } else {
            RoomLeave::Left(room.clone())
        };
        book.members.remove(identity);

        info!(room_id = %room_id, identity = %identity, "Player left room");
        Ok(outcome)
    }

    /// Delete finished rooms older than the retention window
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let expired = |room: &Room| {
            room.status == RoomStatus::Finished
                && room.finished_at.is_some_and(|at| now - at >= retention)
        };

        // Snapshot under the read lock, recheck under the write lock
        let candidates: Vec<Uuid> = self
            .book
            .read()
            .rooms
            .values()
            .filter(|r| expired(*r))
            .map(|r| r.id)
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        let mut book = self.book.write();
        let mut removed = 0;
        for room_id in candidates {
            if book.rooms.get(&room_id).is_some_and(|r| expired(r)) {
                book.delete(room_id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept finished rooms");
        }
        removed
    }

    pub fn room_count(&self) -> usize {
        self.book.read().rooms.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn assert_ready_invariant(room: &Room) {
        let both_ready = room.players.len() == 2 && room.players.iter().all(|p| p.ready);
        if !matches!(room.status, RoomStatus::Playing | RoomStatus::Finished) {
            assert_eq!(room.status == RoomStatus::Ready, both_ready);
        }
    }

    fn full_room(registry: &RoomRegistry) -> Room {
        let room = registry.create_room("Friday", 3, "owner", "Owner").unwrap();
        registry.join_by_code(&room.join_code, "guest", "Guest").unwrap()
    }

    fn ready_room(registry: &RoomRegistry) -> Room {
        let room = full_room(registry);
        registry.set_ready(room.id, "owner").unwrap();
        registry.set_ready(room.id, "guest").unwrap()
    }

    #[test]
    fn test_create_room_validates_input() {
        let registry = RoomRegistry::default();
        assert!(matches!(
            registry.create_room("", 5, "a", "A"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            registry.create_room("x", 0, "a", "A"),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(registry.room_count(), 0);

        let room = assert_ok!(registry.create_room("x", 5, "a", "A"));
        assert_eq!(room.join_code.len(), 5);
        assert_eq!(room.players[0].side, Some(Side::Left));
        assert!(registry.create_room("y", 5, "a", "A").is_err());
    }

    #[test]
    fn test_join_by_code_errors() {
        let registry = RoomRegistry::default();
        let room = full_room(&registry);

        assert!(matches!(
            registry.join_by_code("ZZ", "c", "C"),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            registry.join_by_code("ZZZZ1", "c", "C"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            registry.join_by_code(&room.join_code, "guest", "Guest"),
            Err(CoreError::Conflict(_))
        ));
        assert!(matches!(
            registry.join_by_code(&room.join_code.to_lowercase(), "c", "C"),
            Err(CoreError::Conflict(_))
        ));
    }

    #[test]
    fn test_joiner_takes_right_side() {
        let registry = RoomRegistry::default();
        let room = full_room(&registry);
        assert_eq!(room.players[1].side, Some(Side::Right));
        assert_eq!(registry.room_for("guest").unwrap().id, room.id);
        assert!(registry.list_available().is_empty());
    }

    #[test]
    fn test_ready_iff_both_present_and_ready() {
        let registry = RoomRegistry::default();
        let room = registry.create_room("r", 5, "owner", "Owner").unwrap();

        let room = registry.set_ready(room.id, "owner").unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_ready_invariant(&room);

        let room = registry.join_by_code(&room.join_code, "guest", "Guest").unwrap();
        assert_ready_invariant(&room);
        let room = registry.set_ready(room.id, "guest").unwrap();
        assert_eq!(room.status, RoomStatus::Ready);
        assert_ready_invariant(&room);

        let room = registry.set_unready(room.id, "owner").unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_ready_invariant(&room);
    }

    #[test]
    fn test_create_game_requires_ready() {
        let registry = RoomRegistry::default();
        let room = full_room(&registry);
        assert!(matches!(
            registry.create_game(room.id, "owner"),
            Err(CoreError::State(_))
        ));
    }

    #[test]
    fn test_create_game_is_idempotent() {
        let registry = RoomRegistry::default();
        let room = ready_room(&registry);

        let first = assert_ok!(registry.create_game(room.id, "owner"));
        let second = assert_ok!(registry.create_game(room.id, "guest"));
        assert_eq!(first, second);

        let room = registry.get(room.id).unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.game_id, Some(first));
        assert_eq!(registry.find_by_game(first).unwrap().id, room.id);
    }

    #[test]
    fn test_ready_after_start_is_rejected() {
        let registry = RoomRegistry::default();
        let room = ready_room(&registry);
        registry.create_game(room.id, "owner").unwrap();

        assert!(matches!(
            registry.set_unready(room.id, "guest"),
            Err(CoreError::State(_))
        ));
    }

    #[test]
    fn test_record_result_resets_for_rematch() {
        let registry = RoomRegistry::default();
        let room = ready_room(&registry);
        registry.create_game(room.id, "owner").unwrap();

        let room = assert_ok!(registry.record_result(room.id, "guest"));
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.game_id, None);
        assert!(room.players.iter().all(|p| !p.ready));

        // Nothing left to record
        assert_err!(registry.record_result(room.id, "guest"));
    }

    #[test]
    fn test_guest_leaving_running_game_marks_finished() {
        let registry = RoomRegistry::default();
        let room = ready_room(&registry);
        let game_id = registry.create_game(room.id, "owner").unwrap();

        let outcome = registry.leave(room.id, "guest").unwrap();
        let RoomLeave::Left(room) = outcome else {
            panic!("room should survive a guest leaving");
        };
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(room.finished_at.is_some());
        assert_eq!(room.game_id, Some(game_id));
        assert!(registry.room_for("guest").is_none());

        // The hub's forfeit resolution puts it back to waiting
        let room = registry.record_result(room.id, "owner").unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
    }

    #[test]
    fn test_owner_leaving_deletes_room() {
        let registry = RoomRegistry::default();
        let room = full_room(&registry);

        assert!(matches!(
            registry.leave(room.id, "owner"),
            Ok(RoomLeave::Deleted)
        ));
        assert!(registry.get(room.id).is_none());
        assert!(registry.room_for("guest").is_none());
        assert!(matches!(
            registry.join_by_code(&room.join_code, "x", "X"),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_guest_leaving_reopens_room() {
        let registry = RoomRegistry::default();
        let room = ready_room(&registry);

        let RoomLeave::Left(room) = registry.leave(room.id, "guest").unwrap() else {
            panic!("room should survive");
        };
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(registry.list_available().len(), 1);
    }

    #[test]
    fn test_sweep_removes_old_finished_rooms() {
        let registry = RoomRegistry::new(Duration::ZERO);
        let finished = ready_room(&registry);
        registry.create_game(finished.id, "owner").unwrap();
        registry.leave(finished.id, "guest").unwrap();

        let waiting = registry.create_room("w", 5, "other", "Other").unwrap();

        assert_eq!(registry.sweep(), 1);
        assert!(registry.get(finished.id).is_none());
        assert!(registry.get(waiting.id).is_some());
        assert!(registry.room_for("owner").is_none());
    }
}
