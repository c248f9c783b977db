//! Authoritative state of a single Pong match

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::util::time::{clamp_delta, unix_millis};
use crate::ws::protocol::{
    BallState, Direction, MatchSnapshot, MatchStatus, PaddleState, PerSide, Side,
};

use super::physics::{
    bounce_off_walls, centered_ball, goal_scored_by, initial_paddle, move_ball, move_paddle,
    resolve_paddle_hit, serve_velocity, Court,
};
use super::Identity;

/// What a single tick changed, for logging by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub goal: Option<Side>,
    pub finished: bool,
}

/// One match: two paddles, a ball and the score.
///
/// Owned by the session hub behind a mutex; everything else only ever sees
/// [`MatchSnapshot`]s.
pub struct MatchSimulation {
    id: Uuid,
    max_score: u32,
    status: MatchStatus,
    paddles: PerSide<PaddleState>,
    /// Effective paddle velocity during the last tick (after clamping)
    paddle_motion: PerSide<f32>,
    ball: BallState,
    scores: PerSide<u32>,
    bound: PerSide<Option<Identity>>,
    forfeit_winner: Option<Side>,
    rng: ChaCha8Rng,
    last_update: u64,
}

impl MatchSimulation {
    pub fn new(id: Uuid, max_score: u32, seed: u64) -> Self {
        Self {
            id,
            max_score: max_score.max(1),
            status: MatchStatus::Waiting,
            paddles: PerSide {
                left: initial_paddle(Side::Left),
                right: initial_paddle(Side::Right),
            },
            paddle_motion: PerSide::default(),
            ball: centered_ball(),
            scores: PerSide::default(),
            bound: PerSide::default(),
            forfeit_winner: None,
            rng: ChaCha8Rng::seed_from_u64(seed),
            last_update: unix_millis(),
        }
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn max_score(&self) -> u32 {
        self.max_score
    }

    pub fn scores(&self) -> PerSide<u32> {
        self.scores
    }

    #[cfg(test)]
    pub fn ball(&self) -> &BallState {
        &self.ball
    }

    #[cfg(test)]
    pub fn paddle(&self, side: Side) -> &PaddleState {
        self.paddles.get(side)
    }

    /// Identity bound to a side
    pub fn player(&self, side: Side) -> Option<&str> {
        self.bound.get(side).as_deref()
    }

    pub fn side_of(&self, identity: &str) -> Option<Side> {
        Side::BOTH
            .into_iter()
            .find(|side| self.bound.get(*side).as_deref() == Some(identity))
    }

    pub fn bound_count(&self) -> usize {
        Side::BOTH
            .iter()
            .filter(|side| self.bound.get(**side).is_some())
            .count()
    }

    pub fn is_full(&self) -> bool {
        self.bound_count() == 2
    }

    pub fn is_empty(&self) -> bool {
        self.bound_count() == 0
    }

    /// Bind an identity to the first free side (left, then right).
    /// Returns `None` if both sides are taken or the identity is already bound.
    pub fn add_player(&mut self, identity: &str) -> Option<Side> {
        if self.status == MatchStatus::Finished || self.side_of(identity).is_some() {
            return None;
        }

        let side = Side::BOTH
            .into_iter()
            .find(|side| self.bound.get(*side).is_none())?;
        *self.bound.get_mut(side) = Some(identity.to_string());
        Some(side)
    }

    /// Unbind an identity. A running match is forfeited to the other side.
    pub fn remove_player(&mut self, identity: &str) -> Option<Side> {
        let side = self.side_of(identity)?;
        *self.bound.get_mut(side) = None;
        self.paddles.get_mut(side).velocity = 0.0;

        if matches!(self.status, MatchStatus::Playing | MatchStatus::Paused) {
            self.forfeit_winner = Some(side.opponent());
            self.status = MatchStatus::Finished;
        }
        Some(side)
    }

    /// Set the paddle velocity for the sender's side. Last write wins.
    pub fn apply_input(&mut self, identity: &str, direction: Direction) -> bool {
        let Some(side) = self.side_of(identity) else {
            return false;
        };
        if self.status == MatchStatus::Finished {
            return false;
        }

        self.paddles.get_mut(side).velocity = match direction {
            Direction::Up => Court::PADDLE_SPEED,
            Direction::Down => -Court::PADDLE_SPEED,
            Direction::Stop => 0.0,
        };
        true
    }

    /// Waiting -> Playing, only once both sides are bound
    pub fn start(&mut self) -> bool {
        if self.status != MatchStatus::Waiting || !self.is_full() {
            return false;
        }
        self.status = MatchStatus::Playing;
        let toward = if self.rng.gen_bool(0.5) {
            Side::Left
        } else {
            Side::Right
        };
        self.serve(toward);
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.status != MatchStatus::Playing {
            return false;
        }
        self.status = MatchStatus::Paused;
        true
    }

    pub fn unpause(&mut self) -> bool {
        if self.status != MatchStatus::Paused {
            return false;
        }
        self.status = MatchStatus::Playing;
        true
    }

    /// Advance the simulation. Does nothing unless the match is playing.
    pub fn tick(&mut self, delta_secs: f32) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if self.status != MatchStatus::Playing {
            return outcome;
        }

        let dt = clamp_delta(delta_secs);
        self.last_update = unix_millis();

        let steps = (dt / Court::MAX_STEP).ceil().max(1.0) as u32;
        let step = dt / steps as f32;
        let mut scored = None;
        for _ in 0..steps {
            scored = self.step(step);
            if scored.is_some() {
                break;
            }
        }

        if let Some(scorer) = scored {
            outcome.goal = Some(scorer);
            *self.scores.get_mut(scorer) += 1;

            if *self.scores.get(scorer) >= self.max_score {
                self.status = MatchStatus::Finished;
                self.ball = centered_ball();
                outcome.finished = true;
            } else {
                // Loser of the point receives the next serve
                self.serve(scorer.opponent());
            }
        }

        outcome
    }

    /// One bounded slice of movement and collision. Returns the scorer on a goal.
    fn step(&mut self, dt: f32) -> Option<Side> {
        for side in Side::BOTH {
            let motion = move_paddle(self.paddles.get_mut(side), dt);
            *self.paddle_motion.get_mut(side) = motion;
        }

        move_ball(&mut self.ball, dt);
        bounce_off_walls(&mut self.ball);

        for side in Side::BOTH {
            let paddle = *self.paddles.get(side);
            if resolve_paddle_hit(&mut self.ball, &paddle, *self.paddle_motion.get(side)) {
                break;
            }
        }

        goal_scored_by(&self.ball)
    }

    /// Winner once finished: the forfeit winner if a forfeit ended the match,
    /// otherwise the side holding more points.
    pub fn winner(&self) -> Option<Side> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        if let Some(side) = self.forfeit_winner {
            return Some(side);
        }
        match self.scores.left.cmp(&self.scores.right) {
            std::cmp::Ordering::Greater => Some(Side::Left),
            std::cmp::Ordering::Less => Some(Side::Right),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn was_forfeited(&self) -> bool {
        self.forfeit_winner.is_some()
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot {
            id: self.id,
            paddles: self.paddles,
            ball: self.ball,
            scores: self.scores,
            max_score: self.max_score,
            status: self.status,
            bound_players: self.bound.clone(),
            last_update_timestamp: self.last_update,
        }
    }

    fn serve(&mut self, toward: Side) {
        let magnitude = self
            .rng
            .gen_range(Court::SERVE_ANGLE_MIN..Court::SERVE_ANGLE_MAX);
        let angle = if self.rng.gen_bool(0.5) {
            magnitude
        } else {
            -magnitude
        };
        self.ball = centered_ball();
        self.ball.velocity = serve_velocity(toward, angle);
    }

    #[cfg(test)]
    pub(crate) fn ball_mut(&mut self) -> &mut BallState {
        &mut self.ball
    }
}
