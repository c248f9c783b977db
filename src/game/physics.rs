//! Court geometry, paddle movement and ball collision
//!
//! The court is centered on the origin: x grows towards the right goal,
//! y grows upwards. Everything here is a pure function of its inputs so a
//! given ball/paddle state always produces bit-identical results.

use crate::ws::protocol::{BallState, PaddleSize, PaddleState, Side, Vector3};

/// Court and tuning constants
#[derive(Debug, Clone, Copy)]
pub struct Court;

impl Court {
    pub const WIDTH: f32 = 32.0;
    pub const HEIGHT: f32 = 24.0;
    pub const HALF_WIDTH: f32 = Self::WIDTH / 2.0;
    pub const HALF_HEIGHT: f32 = Self::HEIGHT / 2.0;

    pub const PADDLE_WIDTH: f32 = 0.8;
    pub const PADDLE_HEIGHT: f32 = 4.0;
    pub const PADDLE_DEPTH: f32 = 0.8;
    /// Distance from the goal line to the paddle center
    pub const PADDLE_INSET: f32 = 1.0;
    pub const PADDLE_SPEED: f32 = 18.0;

    pub const BALL_RADIUS: f32 = 0.5;
    pub const BALL_SPEED_INITIAL: f32 = 12.0;
    pub const BALL_SPEED_MAX: f32 = 24.0;
    /// Longest slice a tick is split into, so a ball at top speed can't skip a paddle
    pub const MAX_STEP: f32 = 1.0 / 120.0;
    /// Speed multiplier applied on every paddle hit
    pub const BALL_SPEED_UP: f32 = 1.05;

    /// Extra reach around the paddle box when testing overlap
    pub const COLLISION_TOLERANCE: f32 = 0.05;
    /// Vertical speed per unit of hit offset, as a fraction of ball speed
    pub const SPIN_OFFSET_FACTOR: f32 = 0.75;
    /// Share of the paddle's own velocity handed to the ball
    pub const SPIN_PADDLE_TRANSFER: f32 = 0.3;
    /// The ball never leaves a paddle flatter than this share of its speed
    pub const MIN_HORIZONTAL_SHARE: f32 = 0.5;
    /// Gap left between ball and paddle after a hit
    pub const SEPARATION: f32 = 0.01;

    /// Serve angle range (radians from horizontal)
    pub const SERVE_ANGLE_MIN: f32 = 0.2;
    pub const SERVE_ANGLE_MAX: f32 = 0.6;

    /// Highest center position a paddle may reach
    pub fn paddle_travel() -> f32 {
        Self::HALF_HEIGHT - Self::PADDLE_HEIGHT / 2.0
    }

    pub fn paddle_x(side: Side) -> f32 {
        match side {
            Side::Left => -Self::HALF_WIDTH + Self::PADDLE_INSET,
            Side::Right => Self::HALF_WIDTH - Self::PADDLE_INSET,
        }
    }
}

/// Paddle at rest in the middle of its side
pub fn initial_paddle(side: Side) -> PaddleState {
    PaddleState {
        side,
        position: Vector3::new(Court::paddle_x(side), 0.0, 0.0),
        velocity: 0.0,
        size: PaddleSize {
            width: Court::PADDLE_WIDTH,
            height: Court::PADDLE_HEIGHT,
            depth: Court::PADDLE_DEPTH,
        },
    }
}

/// Stationary ball at the center spot
pub fn centered_ball() -> BallState {
    BallState {
        position: Vector3::ZERO,
        velocity: Vector3::ZERO,
        radius: Court::BALL_RADIUS,
    }
}

/// Serve velocity. `toward` picks the side that receives, `angle` is signed radians.
pub fn serve_velocity(toward: Side, angle: f32) -> Vector3 {
    let dir = match toward {
        Side::Left => -1.0,
        Side::Right => 1.0,
    };
    Vector3::new(
        dir * Court::BALL_SPEED_INITIAL * angle.cos(),
        Court::BALL_SPEED_INITIAL * angle.sin(),
        0.0,
    )
}

/// Advance a paddle by its velocity and clamp to the travel range.
/// Returns the velocity it actually moved at, which drives spin.
pub fn move_paddle(paddle: &mut PaddleState, dt: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    let travel = Court::paddle_travel();
    let before = paddle.position.y;
    paddle.position.y = (before + paddle.velocity * dt).clamp(-travel, travel);
    (paddle.position.y - before) / dt
}

/// Advance the ball by its velocity
pub fn move_ball(ball: &mut BallState, dt: f32) {
    ball.position.x += ball.velocity.x * dt;
    ball.position.y += ball.velocity.y * dt;
    ball.position.z += ball.velocity.z * dt;
}

/// Reflect off the top/bottom walls. Returns true if the ball bounced.
pub fn bounce_off_walls(ball: &mut BallState) -> bool {
    let limit = Court::HALF_HEIGHT - ball.radius;
    if ball.position.y > limit {
        ball.position.y = limit;
        ball.velocity.y = -ball.velocity.y.abs();
        true
    } else if ball.position.y < -limit {
        ball.position.y = -limit;
        ball.velocity.y = ball.velocity.y.abs();
        true
    } else {
        false
    }
}

/// Axis-aligned overlap between the ball's box and the paddle's box (plus tolerance)
pub fn overlaps(ball: &BallState, paddle: &PaddleState) -> bool {
    let reach_x = paddle.size.width / 2.0 + ball.radius + Court::COLLISION_TOLERANCE;
    let reach_y = paddle.size.height / 2.0 + ball.radius + Court::COLLISION_TOLERANCE;
    (ball.position.x - paddle.position.x).abs() <= reach_x
        && (ball.position.y - paddle.position.y).abs() <= reach_y
}

/// True if the ball is travelling towards the given paddle's goal
pub fn moving_toward(ball: &BallState, side: Side) -> bool {
    match side {
        Side::Left => ball.velocity.x < 0.0,
        Side::Right => ball.velocity.x > 0.0,
    }
}

/// Resolve a hit against one paddle.
///
/// Only accepted when the boxes overlap and the ball heads towards the paddle,
/// so a ball that was just returned can't be caught a second time. The
/// outgoing vertical speed depends on where the ball struck the paddle plus
/// part of the paddle's motion; total speed is capped at `BALL_SPEED_MAX`.
pub fn resolve_paddle_hit(ball: &mut BallState, paddle: &PaddleState, paddle_velocity: f32) -> bool {
    if !moving_toward(ball, paddle.side) || !overlaps(ball, paddle) {
        return false;
    }

    let half_height = paddle.size.height / 2.0;
    let offset = ((ball.position.y - paddle.position.y) / half_height).clamp(-1.0, 1.0);

    let speed = (ball.velocity.length() * Court::BALL_SPEED_UP).min(Court::BALL_SPEED_MAX);
    let away = match paddle.side {
        Side::Left => 1.0,
        Side::Right => -1.0,
    };

    let mut vy = offset * speed * Court::SPIN_OFFSET_FACTOR
        + paddle_velocity * Court::SPIN_PADDLE_TRANSFER;
    let max_vy = speed * (1.0 - Court::MIN_HORIZONTAL_SHARE * Court::MIN_HORIZONTAL_SHARE).sqrt();
    vy = vy.clamp(-max_vy, max_vy);
    let vx = (speed * speed - vy * vy).max(0.0).sqrt() * away;

    ball.velocity = Vector3::new(vx, vy, 0.0);
    clamp_speed(ball, Court::BALL_SPEED_MAX);

    // Park the ball just outside the paddle face
    let face = paddle.size.width / 2.0 + ball.radius + Court::SEPARATION;
    ball.position.x = paddle.position.x + away * face;
    true
}

/// Scale velocity down so its magnitude doesn't exceed `max`
pub fn clamp_speed(ball: &mut BallState, max: f32) {
    let speed = ball.velocity.length();
    if speed > max && speed > 0.0 {
        let scale = max / speed;
        ball.velocity.x *= scale;
        ball.velocity.y *= scale;
        ball.velocity.z *= scale;
    }
}

/// Which side scored, if the ball has crossed an end line
pub fn goal_scored_by(ball: &BallState) -> Option<Side> {
    if ball.position.x < -Court::HALF_WIDTH {
        Some(Side::Right)
    } else if ball.position.x > Court::HALF_WIDTH {
        Some(Side::Left)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_at(x: f32, y: f32, vx: f32, vy: f32) -> BallState {
        BallState {
            position: Vector3::new(x, y, 0.0),
            velocity: Vector3::new(vx, vy, 0.0),
            radius: Court::BALL_RADIUS,
        }
    }

    #[test]
    fn test_paddle_clamped_to_travel() {
        let mut paddle = initial_paddle(Side::Left);
        paddle.velocity = Court::PADDLE_SPEED;

        for _ in 0..200 {
            move_paddle(&mut paddle, 1.0 / 60.0);
        }
        assert_eq!(paddle.position.y, Court::paddle_travel());

        // Pinned against the limit: no effective motion
        let effective = move_paddle(&mut paddle, 1.0 / 60.0);
        assert_eq!(effective, 0.0);
    }

    #[test]
    fn test_wall_bounce_reflects_and_clamps() {
        let mut ball = ball_at(0.0, Court::HALF_HEIGHT + 1.0, 5.0, 3.0);
        assert!(bounce_off_walls(&mut ball));
        assert_eq!(ball.position.y, Court::HALF_HEIGHT - ball.radius);
        assert_eq!(ball.velocity.y, -3.0);
        assert_eq!(ball.velocity.x, 5.0);

        let mut ball = ball_at(0.0, -Court::HALF_HEIGHT, 5.0, -3.0);
        assert!(bounce_off_walls(&mut ball));
        assert_eq!(ball.velocity.y, 3.0);
    }

    #[test]
    fn test_center_hit_returns_ball() {
        let paddle = initial_paddle(Side::Left);
        let mut ball = ball_at(paddle.position.x + 0.6, 0.0, -12.0, 0.0);

        assert!(resolve_paddle_hit(&mut ball, &paddle, 0.0));
        assert!(ball.velocity.x > 0.0);
        assert_eq!(ball.velocity.y, 0.0);
        assert!(ball.position.x > paddle.position.x + paddle.size.width / 2.0 + ball.radius);
    }

    #[test]
    fn test_ball_moving_away_is_ignored() {
        let paddle = initial_paddle(Side::Left);
        let mut ball = ball_at(paddle.position.x + 0.6, 0.0, 12.0, 0.0);
        let before = ball;

        assert!(!resolve_paddle_hit(&mut ball, &paddle, 0.0));
        assert_eq!(ball, before);
    }

    #[test]
    fn test_edge_hit_adds_spin() {
        let paddle = initial_paddle(Side::Right);
        let mut ball = ball_at(paddle.position.x - 0.6, 1.8, 12.0, 0.0);

        assert!(resolve_paddle_hit(&mut ball, &paddle, 0.0));
        assert!(ball.velocity.x < 0.0);
        assert!(ball.velocity.y > 0.0, "upper edge should deflect upwards");
    }

    #[test]
    fn test_moving_paddle_deflects_ball() {
        let paddle = initial_paddle(Side::Left);
        let mut still = ball_at(paddle.position.x + 0.6, 0.0, -12.0, 0.0);
        let mut moving = still;

        resolve_paddle_hit(&mut still, &paddle, 0.0);
        resolve_paddle_hit(&mut moving, &paddle, -Court::PADDLE_SPEED);

        assert_eq!(still.velocity.y, 0.0);
        assert!(moving.velocity.y < 0.0);
    }

    #[test]
    fn test_speed_is_capped() {
        let paddle = initial_paddle(Side::Left);
        let mut ball = ball_at(paddle.position.x + 0.6, 1.0, -Court::BALL_SPEED_MAX, 0.0);

        resolve_paddle_hit(&mut ball, &paddle, Court::PADDLE_SPEED);
        assert!(ball.velocity.length() <= Court::BALL_SPEED_MAX + 1e-4);
    }

    #[test]
    fn test_collision_is_deterministic() {
        let paddle = initial_paddle(Side::Left);
        let mut a = ball_at(paddle.position.x + 0.5, 0.7, -13.0, 2.0);
        let mut b = a;

        resolve_paddle_hit(&mut a, &paddle, 4.0);
        resolve_paddle_hit(&mut b, &paddle, 4.0);

        assert_eq!(a.velocity.x.to_bits(), b.velocity.x.to_bits());
        assert_eq!(a.velocity.y.to_bits(), b.velocity.y.to_bits());
    }

    #[test]
    fn test_reflecting_twice_restores_sign_pattern() {
        let left = initial_paddle(Side::Left);
        let right = initial_paddle(Side::Right);
        let mut ball = ball_at(left.position.x + 0.6, 0.0, -12.0, 0.0);
        let original = ball.velocity.x.signum();

        assert!(resolve_paddle_hit(&mut ball, &left, 0.0));
        assert_eq!(ball.velocity.x.signum(), -original);

        ball.position.x = right.position.x - 0.6;
        assert!(resolve_paddle_hit(&mut ball, &right, 0.0));
        assert_eq!(ball.velocity.x.signum(), original);
    }

    #[test]
    fn test_goal_detection() {
        assert_eq!(goal_scored_by(&ball_at(-Court::HALF_WIDTH - 0.1, 0.0, -1.0, 0.0)), Some(Side::Right));
        assert_eq!(goal_scored_by(&ball_at(Court::HALF_WIDTH + 0.1, 0.0, 1.0, 0.0)), Some(Side::Left));
        assert_eq!(goal_scored_by(&ball_at(0.0, 0.0, 1.0, 0.0)), None);
    }

    #[test]
    fn test_serve_velocity_direction() {
        let v = serve_velocity(Side::Left, 0.3);
        assert!(v.x < 0.0);
        assert!((v.length() - Court::BALL_SPEED_INITIAL).abs() < 1e-4);
    }
}
