//! One running match as seen by the hub: the simulation plus who is seated where

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::game::{Identity, MatchSimulation};
use crate::store::GameType;
use crate::ws::protocol::{MatchStatus, PerSide, ServerMsg, Side};

pub type ConnectionId = u64;

/// Which context a match belongs to, fixed when the simulation is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOwner {
    Matchmaking,
    Room { room_id: Uuid },
    Tournament { tournament_id: Uuid, match_id: Uuid },
}

impl GameOwner {
    pub fn game_type(&self) -> GameType {
        match self {
            GameOwner::Matchmaking => GameType::Matchmaking,
            GameOwner::Room { .. } => GameType::Room,
            GameOwner::Tournament { .. } => GameType::Tournament,
        }
    }
}

/// Connection currently bound to a side
pub(crate) struct Seat {
    pub connection: ConnectionId,
    pub identity: Identity,
    pub outbound: mpsc::Sender<ServerMsg>,
}

/// Who played a side. Kept after the seat empties so results can name both players.
#[derive(Debug, Clone)]
pub(crate) struct RosterEntry {
    pub identity: Identity,
    pub email: Option<String>,
}

impl RosterEntry {
    /// Address reported to the persistence endpoint
    pub fn contact(&self) -> String {
        self.email.clone().unwrap_or_else(|| self.identity.clone())
    }
}

pub(crate) struct LiveState {
    pub sim: MatchSimulation,
    pub seats: PerSide<Option<Seat>>,
    pub roster: PerSide<Option<RosterEntry>>,
}

impl LiveState {
    pub fn send_to(&self, side: Side, msg: ServerMsg) {
        if let Some(seat) = self.seats.get(side) {
            push(&seat.outbound, msg);
        }
    }

    /// Current state to every seated connection, each with its own side
    pub fn broadcast_state(&self) {
        let snapshot = self.sim.snapshot();
        for side in Side::BOTH {
            self.send_to(
                side,
                ServerMsg::GameState {
                    state: snapshot.clone(),
                    player_position: Some(side),
                },
            );
        }
    }
}

pub(crate) struct LiveMatch {
    pub id: Uuid,
    pub owner: GameOwner,
    /// Identities allowed to bind; `None` for open quick play games
    pub allowed: Option<[Identity; 2]>,
    pub state: Mutex<LiveState>,
    loop_started: AtomicBool,
    finalized: AtomicBool,
    torn_down: AtomicBool,
}

impl LiveMatch {
    pub fn new(id: Uuid, owner: GameOwner, allowed: Option<[Identity; 2]>, max_score: u32) -> Self {
        Self {
            id,
            owner,
            allowed,
            state: Mutex::new(LiveState {
                sim: MatchSimulation::new(id, max_score, rand::random()),
                seats: PerSide::default(),
                roster: PerSide::default(),
            }),
            loop_started: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn admits(&self, identity: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|a| a == identity))
    }

    /// Waiting for a second player and open to anyone
    pub fn is_open_quick_play(&self) -> bool {
        if self.owner != GameOwner::Matchmaking || self.allowed.is_some() || self.is_torn_down() {
            return false;
        }
        let state = self.state.lock();
        state.sim.status() == MatchStatus::Waiting && !state.sim.is_full()
    }

    /// True exactly once, for whoever gets to spawn the tick loop
    pub fn claim_loop(&self) -> bool {
        !self.loop_started.swap(true, Ordering::AcqRel)
    }

    /// True exactly once, for whoever gets to report the result
    pub fn claim_finish(&self) -> bool {
        !self.finalized.swap(true, Ordering::AcqRel)
    }

    pub fn claim_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

/// Non-blocking send; a slow client loses frames rather than stalling the tick loop
pub(crate) fn push(outbound: &mpsc::Sender<ServerMsg>, msg: ServerMsg) {
    if let Err(TrySendError::Full(_)) = outbound.try_send(msg) {
        debug!("Outbound buffer full, dropping frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_succeed_once() {
        let live = LiveMatch::new(Uuid::new_v4(), GameOwner::Matchmaking, None, 3);
        assert!(live.claim_finish());
        assert!(!live.claim_finish());
        assert!(live.claim_loop());
        assert!(!live.claim_loop());
        assert!(live.claim_teardown());
        assert!(live.is_torn_down());
    }

    #[test]
    fn test_admits_only_listed_identities() {
        let open = LiveMatch::new(Uuid::new_v4(), GameOwner::Matchmaking, None, 3);
        assert!(open.admits("anyone"));
        assert!(open.is_open_quick_play());

        let room = LiveMatch::new(
            Uuid::new_v4(),
            GameOwner::Room { room_id: Uuid::new_v4() },
            Some(["a".to_string(), "b".to_string()]),
            3,
        );
        assert!(room.admits("b"));
        assert!(!room.admits("c"));
        assert!(!room.is_open_quick_play());
    }

    #[test]
    fn test_contact_falls_back_to_identity() {
        let entry = RosterEntry {
            identity: "user-1".to_string(),
            email: None,
        };
        assert_eq!(entry.contact(), "user-1");
    }
}
