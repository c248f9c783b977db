//! Single-elimination bracket stored as rounds of matches.
//!
//! Round `r` (0-based here) match `i` feeds round `r + 1` match `i / 2`:
//! even indices fill `player1`, odd indices fill `player2`. A match whose odd
//! feeder does not exist can only ever get one player; it is a bye and
//! completes as soon as that player arrives.

use serde::Serialize;
use uuid::Uuid;

use crate::game::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketMatchStatus {
    /// Waiting for earlier rounds
    Pending,
    /// Both players known, ready check open
    Lobby,
    Ready,
    Playing,
    Completed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketMatch {
    pub id: Uuid,
    /// 1-based round number
    pub round: u32,
    pub player1: Option<Identity>,
    pub player2: Option<Identity>,
    pub player1_ready: bool,
    pub player2_ready: bool,
    pub status: BracketMatchStatus,
    pub winner_id: Option<Identity>,
    pub game_id: Option<Uuid>,
    /// Advanced without playing
    pub bye: bool,
}

impl BracketMatch {
    fn new(round: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            round,
            player1: None,
            player2: None,
            player1_ready: false,
            player2_ready: false,
            status: BracketMatchStatus::Pending,
            winner_id: None,
            game_id: None,
            bye: false,
        }
    }

    pub fn has_player(&self, identity: &str) -> bool {
        self.player1.as_deref() == Some(identity) || self.player2.as_deref() == Some(identity)
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self.status,
            BracketMatchStatus::Lobby | BracketMatchStatus::Ready | BracketMatchStatus::Playing
        )
    }

    pub fn both_ready(&self) -> bool {
        self.player1_ready && self.player2_ready
    }
}

pub type Bracket = Vec<Vec<BracketMatch>>;

/// Matches per round for `entrants` players: ceil(n / 2^r) for r = 1..
pub fn round_sizes(entrants: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut remaining = entrants;
    while remaining > 1 {
        remaining = remaining.div_ceil(2);
        sizes.push(remaining);
    }
    sizes
}

/// Build the bracket from seeded players. Round-1 byes are resolved right
/// away; every round-1 match with two players opens its lobby.
pub fn seed(players: &[Identity]) -> Bracket {
    let mut bracket: Bracket = round_sizes(players.len())
        .into_iter()
        .enumerate()
        .map(|(r, size)| (0..size).map(|_| BracketMatch::new(r as u32 + 1)).collect())
        .collect();

    if bracket.is_empty() {
        return bracket;
    }
    for (i, m) in bracket[0].iter_mut().enumerate() {
        m.player1 = players.get(2 * i).cloned();
        m.player2 = players.get(2 * i + 1).cloned();
    }

    let byes: Vec<(usize, Identity)> = bracket[0]
        .iter()
        .enumerate()
        .filter(|(_, m)| m.player2.is_none())
        .filter_map(|(i, m)| m.player1.clone().map(|p| (i, p)))
        .collect();
    for (i, player) in byes {
        complete(&mut bracket, 0, i, player, true);
    }

    open_round(&mut bracket, 0);
    bracket
}

/// Whether match `index` of round `round` can only ever receive one player
fn is_bye_slot(bracket: &Bracket, round: usize, index: usize) -> bool {
    if round == 0 {
        return bracket[0][index].player2.is_none();
    }
    2 * index + 1 >= bracket[round - 1].len()
}

/// Mark a match completed and carry the winner forward, cascading byes
pub fn complete(bracket: &mut Bracket, round: usize, index: usize, winner: Identity, bye: bool) {
    let m = &mut bracket[round][index];
    m.status = BracketMatchStatus::Completed;
    m.winner_id = Some(winner.clone());
    m.bye = bye;

    let next_round = round + 1;
    if next_round >= bracket.len() {
        return;
    }
    let next_index = index / 2;
    let next = &mut bracket[next_round][next_index];
    if index % 2 == 0 {
        next.player1 = Some(winner.clone());
    } else {
        next.player2 = Some(winner.clone());
    }

    if is_bye_slot(bracket, next_round, next_index) {
        complete(bracket, next_round, next_index, winner, true);
    }
}

/// Open the ready check on every match of a round that has both players
pub fn open_round(bracket: &mut Bracket, round: usize) {
    if let Some(matches) = bracket.get_mut(round) {
        for m in matches.iter_mut() {
            if m.status == BracketMatchStatus::Pending && m.player1.is_some() && m.player2.is_some() {
                m.status = BracketMatchStatus::Lobby;
            }
        }
    }
}

pub fn round_complete(bracket: &Bracket, round: usize) -> bool {
    bracket
        .get(round)
        .is_some_and(|ms| ms.iter().all(|m| m.status == BracketMatchStatus::Completed))
}

/// Locate a match by id as (round index, match index)
pub fn position_of(bracket: &Bracket, match_id: Uuid) -> Option<(usize, usize)> {
    bracket.iter().enumerate().find_map(|(r, ms)| {
        ms.iter()
            .position(|m| m.id == match_id)
            .map(|i| (r, i))
    })
}

/// Winner of the final, once played
pub fn champion(bracket: &Bracket) -> Option<&Identity> {
    bracket.last()?.first()?.winner_id.as_ref()
}
