//! HTTP route definitions

use axum::{
    extract::{Extension, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::config::Config;
use crate::error::CoreError;
use crate::game::DEFAULT_MAX_SCORE;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::matchmaking::QueueStatus;
use crate::rooms::{Room, RoomLeave};
use crate::tournament::{BracketMatch, Tournament, TournamentLeave};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/queue/join", post(queue_join_handler))
        .route("/queue/leave", post(queue_leave_handler))
        .route("/queue/status", get(queue_status_handler))
        .route("/rooms", post(room_create_handler))
        .route("/rooms/join", post(room_join_handler))
        .route("/rooms/mine", get(room_mine_handler))
        .route("/rooms/available", get(room_available_handler))
        .route("/rooms/:id/ready", post(room_ready_handler))
        .route("/rooms/:id/unready", post(room_unready_handler))
        .route("/rooms/:id/game", post(room_game_handler))
        .route("/rooms/:id/leave", post(room_leave_handler))
        .route(
            "/tournaments",
            post(tournament_create_handler).get(tournament_list_handler),
        )
        .route("/tournaments/join", post(tournament_join_code_handler))
        .route("/tournaments/:id", get(tournament_get_handler))
        .route("/tournaments/:id/join", post(tournament_join_handler))
        .route("/tournaments/:id/leave", post(tournament_leave_handler))
        .route("/tournaments/:id/start", post(tournament_start_handler))
        .route(
            "/tournaments/:id/current-matches",
            get(tournament_current_matches_handler),
        )
        .route("/tournaments/:id/my-match", get(tournament_my_match_handler))
        .route(
            "/tournaments/:id/matches/:match_id/game",
            post(tournament_match_game_handler),
        )
        .route(
            "/tournaments/:id/matches/:match_id/ready",
            post(tournament_match_ready_handler),
        )
        .route(
            "/tournaments/:id/matches/:match_id/unready",
            post(tournament_match_unready_handler),
        )
        .route(
            "/tournaments/:id/matches/:match_id/result",
            post(tournament_match_result_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

/// CORS for the configured origins; `*` allows any origin without credentials
fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match config.allowed_origins() {
        None => cors.allow_origin(Any),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            cors.allow_origin(origins).allow_credentials(true)
        }
    }
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    bound_players: usize,
    connections: usize,
    queue_size: usize,
    paired_matches: usize,
    rooms: usize,
    tournaments: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue_size = state.matchmaking.queue_size().await;
    let paired_matches = state.matchmaking.paired_count().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.hub.active_matches(),
        bound_players: state.hub.bound_players(),
        connections: state.hub.connection_count(),
        queue_size,
        paired_matches,
        rooms: state.rooms.room_count(),
        tournaments: state.tournaments.tournament_count(),
    })
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatusResponse {
    in_queue: bool,
    position: Option<usize>,
    estimated_wait: Option<u64>,
    game_id: Option<Uuid>,
}

impl From<QueueStatus> for QueueStatusResponse {
    fn from(status: QueueStatus) -> Self {
        Self {
            in_queue: status.in_queue,
            position: status.position,
            estimated_wait: status.estimated_wait_secs,
            game_id: status.game_id,
        }
    }
}

async fn queue_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<QueueStatusResponse>, AppError> {
    let status = state
        .matchmaking
        .join(&auth.identity, &auth.display_name, state.hub.as_ref())
        .await?;
    Ok(Json(status.into()))
}

#[derive(Serialize)]
struct QueueLeaveResponse {
    left: bool,
}

async fn queue_leave_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<QueueLeaveResponse> {
    let left = state.matchmaking.leave(&auth.identity).await;
    Json(QueueLeaveResponse { left })
}

async fn queue_status_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<QueueStatusResponse> {
    Json(state.matchmaking.status(&auth.identity).await.into())
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    name: String,
    #[serde(default)]
    max_score: Option<u32>,
}

#[derive(Deserialize)]
struct JoinByCodeRequest {
    code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GameIdResponse {
    game_id: Uuid,
}

#[derive(Serialize)]
struct MyRoomResponse {
    room: Option<Room>,
}

#[derive(Serialize)]
struct RoomLeaveResponse {
    deleted: bool,
    room: Option<Room>,
}

async fn room_create_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), AppError> {
    let room = state.rooms.create_room(
        &req.name,
        req.max_score.unwrap_or(DEFAULT_MAX_SCORE),
        &auth.identity,
        &auth.display_name,
    )?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn room_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<JoinByCodeRequest>,
) -> Result<Json<Room>, AppError> {
    let room = state
        .rooms
        .join_by_code(&req.code, &auth.identity, &auth.display_name)?;
    Ok(Json(room))
}

async fn room_mine_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<MyRoomResponse> {
    Json(MyRoomResponse {
        room: state.rooms.room_for(&auth.identity),
    })
}

async fn room_available_handler(State(state): State<AppState>) -> Json<Vec<Room>> {
    Json(state.rooms.list_available())
}

async fn room_ready_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Room>, AppError> {
    Ok(Json(state.rooms.set_ready(room_id, &auth.identity)?))
}

async fn room_unready_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Room>, AppError> {
    Ok(Json(state.rooms.set_unready(room_id, &auth.identity)?))
}

async fn room_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<GameIdResponse>, AppError> {
    let game_id = state.rooms.create_game(room_id, &auth.identity)?;
    Ok(Json(GameIdResponse { game_id }))
}

async fn room_leave_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomLeaveResponse>, AppError> {
    let response = match state.rooms.leave(room_id, &auth.identity)? {
        RoomLeave::Deleted => RoomLeaveResponse {
            deleted: true,
            room: None,
        },
        RoomLeave::Left(room) => RoomLeaveResponse {
            deleted: false,
            room: Some(room),
        },
    };
    Ok(Json(response))
}

// ============================================================================
// Tournament endpoints
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTournamentRequest {
    name: String,
    size: usize,
    #[serde(default)]
    max_score: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchResultRequest {
    winner_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MyMatchResponse {
    #[serde(rename = "match")]
    current: Option<BracketMatch>,
}

#[derive(Serialize)]
struct TournamentLeaveResponse {
    deleted: bool,
    tournament: Option<Tournament>,
}

async fn tournament_create_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<CreateTournamentRequest>,
) -> Result<(StatusCode, Json<Tournament>), AppError> {
    let tournament = state.tournaments.create(
        &req.name,
        req.size,
        req.max_score.unwrap_or(DEFAULT_MAX_SCORE),
        &auth.identity,
        &auth.display_name,
    )?;
    Ok((StatusCode::CREATED, Json(tournament)))
}

async fn tournament_join_code_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<JoinByCodeRequest>,
) -> Result<Json<Tournament>, AppError> {
    let tournament = state
        .tournaments
        .join_by_code(&req.code, &auth.identity, &auth.display_name)?;
    Ok(Json(tournament))
}

async fn tournament_list_handler(State(state): State<AppState>) -> Json<Vec<Tournament>> {
    Json(state.tournaments.list())
}

async fn tournament_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Tournament>, AppError> {
    let tournament = state
        .tournaments
        .join(tournament_id, &auth.identity, &auth.display_name)?;
    Ok(Json(tournament))
}

async fn tournament_get_handler(
    State(state): State<AppState>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Tournament>, AppError> {
    Ok(Json(state.tournaments.get(tournament_id)?))
}

async fn tournament_leave_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<TournamentLeaveResponse>, AppError> {
    let response = match state.tournaments.leave(tournament_id, &auth.identity)? {
        TournamentLeave::Deleted => TournamentLeaveResponse {
            deleted: true,
            tournament: None,
        },
        TournamentLeave::Left(tournament) => TournamentLeaveResponse {
            deleted: false,
            tournament: Some(tournament),
        },
    };
    Ok(Json(response))
}

async fn tournament_start_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Tournament>, AppError> {
    Ok(Json(state.tournaments.start(tournament_id, &auth.identity)?))
}

async fn tournament_current_matches_handler(
    State(state): State<AppState>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<Vec<BracketMatch>>, AppError> {
    Ok(Json(state.tournaments.current_matches(tournament_id)?))
}

async fn tournament_my_match_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(tournament_id): Path<Uuid>,
) -> Result<Json<MyMatchResponse>, AppError> {
    let current = state
        .tournaments
        .get_player_current_match(tournament_id, &auth.identity)?;
    Ok(Json(MyMatchResponse { current }))
}

async fn tournament_match_game_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((tournament_id, match_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<GameIdResponse>, AppError> {
    let game_id = state
        .tournaments
        .create_match_game(tournament_id, match_id, &auth.identity)?;
    Ok(Json(GameIdResponse { game_id }))
}

async fn tournament_match_ready_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((tournament_id, match_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BracketMatch>, AppError> {
    let m = state
        .tournaments
        .set_player_ready(tournament_id, match_id, &auth.identity)?;
    Ok(Json(m))
}

async fn tournament_match_unready_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((tournament_id, match_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<BracketMatch>, AppError> {
    let m = state
        .tournaments
        .set_player_not_ready(tournament_id, match_id, &auth.identity)?;
    Ok(Json(m))
}

async fn tournament_match_result_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path((tournament_id, match_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<MatchResultRequest>,
) -> Result<Json<Tournament>, AppError> {
    let tournament = state.tournaments.report_match_result(
        tournament_id,
        match_id,
        &req.winner_id,
        &auth.identity,
    )?;
    info!(
        tournament_id = %tournament_id,
        match_id = %match_id,
        reporter = %auth.identity,
        "Tournament result reported over HTTP"
    );
    Ok(Json(tournament))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    State(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::State(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => AppError::Validation(msg),
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            CoreError::Conflict(msg) => AppError::Conflict(msg),
            CoreError::State(msg) => AppError::State(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_status() {
        let cases = [
            (CoreError::validation("bad"), StatusCode::BAD_REQUEST),
            (CoreError::not_found("gone"), StatusCode::NOT_FOUND),
            (CoreError::conflict("taken"), StatusCode::CONFLICT),
            (CoreError::state("late"), StatusCode::UNPROCESSABLE_ENTITY),
        ];
        for (err, status) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.into_response().status(), status);
        }
    }

    #[test]
    fn test_queue_status_response_is_camel_case() {
        let response: QueueStatusResponse = QueueStatus {
            in_queue: true,
            position: Some(2),
            estimated_wait_secs: Some(3),
            game_id: None,
        }
        .into();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["inQueue"], true);
        assert_eq!(json["position"], 2);
        assert_eq!(json["estimatedWait"], 3);
        assert!(json["gameId"].is_null());
    }
}
