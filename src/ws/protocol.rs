//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which end of the court a player defends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];
}

/// Paddle movement command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Stop,
}

/// Lifecycle of a single match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Playing,
    Paused,
    Finished,
}

/// Position/velocity tuple. `z` stays 0 for the flat court.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleSize {
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

/// Paddle state in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaddleState {
    pub side: Side,
    pub position: Vector3,
    /// Vertical velocity in court units per second
    pub velocity: f32,
    pub size: PaddleSize,
}

/// Ball state in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallState {
    pub position: Vector3,
    pub velocity: Vector3,
    pub radius: f32,
}

/// Per-side pair, serialized as `{left, right}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerSide<T> {
    pub left: T,
    pub right: T,
}

impl<T> PerSide<T> {
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }
}

/// Immutable view of one match, pushed to clients every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSnapshot {
    pub id: Uuid,
    pub paddles: PerSide<PaddleState>,
    pub ball: BallState,
    pub scores: PerSide<u32>,
    pub max_score: u32,
    pub status: MatchStatus,
    pub bound_players: PerSide<Option<String>>,
    pub last_update_timestamp: u64,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Bind this connection to a game
    #[serde(rename_all = "camelCase")]
    JoinGame {
        /// Room/tournament/queue issued game id; absent means quick play
        #[serde(default)]
        game_id: Option<Uuid>,
        player_id: String,
        #[serde(default)]
        user_email: Option<String>,
    },

    /// Leave the current game (forfeits a running match)
    LeaveGame,

    /// Paddle movement
    PlayerInput { direction: Direction },

    PauseGame,

    UnpauseGame,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Full match state (on bind, then every tick)
    #[serde(rename_all = "camelCase")]
    GameState {
        #[serde(flatten)]
        state: MatchSnapshot,
        player_position: Option<Side>,
    },

    /// Another player bound to the match
    #[serde(rename_all = "camelCase")]
    PlayerJoined { player_id: String, position: Side },

    /// A bound player left the match
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: String },

    /// Error message
    Error { message: String },
}

impl ServerMsg {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_game_parses_camel_case() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"join_game","playerId":"user-1","userEmail":"a@b.c"}"#,
        )
        .unwrap();

        match msg {
            ClientMsg::JoinGame {
                game_id,
                player_id,
                user_email,
            } => {
                assert!(game_id.is_none());
                assert_eq!(player_id, "user-1");
                assert_eq!(user_email.as_deref(), Some("a@b.c"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_player_input_parses() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"player_input","direction":"up"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMsg::PlayerInput {
                direction: Direction::Up
            }
        ));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"pause_game"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::PauseGame));
    }

    #[test]
    fn test_unknown_direction_rejected() {
        let parsed =
            serde_json::from_str::<ClientMsg>(r#"{"type":"player_input","direction":"left"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_game_state_is_flattened() {
        let paddle = PaddleState {
            side: Side::Left,
            position: Vector3::ZERO,
            velocity: 0.0,
            size: PaddleSize {
                width: 1.0,
                height: 4.0,
                depth: 1.0,
            },
        };
        let snapshot = MatchSnapshot {
            id: Uuid::nil(),
            paddles: PerSide {
                left: paddle,
                right: PaddleState {
                    side: Side::Right,
                    ..paddle
                },
            },
            ball: BallState {
                position: Vector3::ZERO,
                velocity: Vector3::ZERO,
                radius: 0.5,
            },
            scores: PerSide { left: 1, right: 2 },
            max_score: 5,
            status: MatchStatus::Playing,
            bound_players: PerSide {
                left: Some("a".to_string()),
                right: None,
            },
            last_update_timestamp: 42,
        };

        let json = serde_json::to_value(ServerMsg::GameState {
            state: snapshot,
            player_position: Some(Side::Left),
        })
        .unwrap();

        assert_eq!(json["type"], "game_state");
        assert_eq!(json["playerPosition"], "left");
        assert_eq!(json["status"], "playing");
        assert_eq!(json["scores"]["right"], 2);
        assert_eq!(json["boundPlayers"]["left"], "a");
        assert_eq!(json["lastUpdateTimestamp"], 42);
    }

    #[test]
    fn test_side_opponent() {
        assert_eq!(Side::Left.opponent(), Side::Right);
        assert_eq!(Side::Right.opponent(), Side::Left);
    }
}
