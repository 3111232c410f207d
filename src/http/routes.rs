//! HTTP route definitions

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameError, Snapshot};
use crate::rooms::{RoomSummary, Visibility};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::ClientAction;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN is a comma-separated list, or `*`
    let allow_origin = if state.config.client_origin.trim() == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .client_origin
            .split(',')
            .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/action", post(action_handler))
        .route("/player_action", post(action_handler))
        .route("/load_state", get(load_state_handler))
        .route("/list_public_rooms", get(list_public_rooms_handler))
        .route("/create_room", post(create_room_handler))
        .route("/join_room", post(join_room_handler))
        .route("/ws/:room_id", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Room ids are UUIDs; anything else cannot name a room
pub fn parse_room_id(raw: &str) -> Result<Uuid, GameError> {
    raw.trim().parse().map_err(|_| GameError::RoomNotFound)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    active_players: usize,
    active_connections: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.active_rooms(),
        active_players: state.rooms.total_players(),
        active_connections: state.sessions.active_connections(),
    })
}

// ============================================================================
// Game endpoints
// ============================================================================

#[derive(Deserialize)]
struct ActionRequest {
    room_id: String,
    #[serde(rename = "playerId")]
    player_id: String,
    #[serde(flatten)]
    action: ClientAction,
}

/// Apply an action; replies with the snapshot of the tick that applied it
async fn action_handler(
    State(state): State<AppState>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<Arc<Snapshot>>, AppError> {
    let Json(req) = payload.map_err(invalid_body)?;
    let room_id = parse_room_id(&req.room_id)?;
    let kind = req.action.into_intent()?;

    let snapshot = state.rooms.submit(&room_id, &req.player_id, kind).await?;
    Ok(Json(snapshot))
}

#[derive(Deserialize)]
struct RoomQuery {
    room_id: String,
}

async fn load_state_handler(
    State(state): State<AppState>,
    Query(query): Query<RoomQuery>,
) -> Result<Json<Arc<Snapshot>>, AppError> {
    let room_id = parse_room_id(&query.room_id)?;
    let entry = state.rooms.get(&room_id).ok_or(GameError::RoomNotFound)?;
    Ok(Json(entry.handle.latest_snapshot()))
}

async fn list_public_rooms_handler(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.rooms.list_public_rooms())
}

#[derive(Deserialize)]
struct CreateRoomQuery {
    #[serde(rename = "type")]
    room_type: Option<String>,
}

#[derive(Serialize)]
struct CreateRoomResponse {
    room_id: Uuid,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Query(query): Query<CreateRoomQuery>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let visibility = match query.room_type.as_deref() {
        Some(raw) => raw.parse::<Visibility>()?,
        None => Visibility::Public,
    };

    let room_id = state.rooms.create_room(visibility);
    Ok(Json(CreateRoomResponse { room_id }))
}

#[derive(Deserialize)]
struct JoinRoomRequest {
    room_id: String,
    player_id: String,
}

#[derive(Serialize)]
struct JoinRoomResponse {
    success: bool,
}

async fn join_room_handler(
    State(state): State<AppState>,
    payload: Result<Json<JoinRoomRequest>, JsonRejection>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    let Json(req) = payload.map_err(invalid_body)?;
    let room_id = parse_room_id(&req.room_id)?;
    state.rooms.join_room(&room_id, &req.player_id).await?;
    Ok(Json(JoinRoomResponse { success: true }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Game(#[from] GameError),
}

/// Malformed bodies get the same error shape as rejected intents
fn invalid_body(rejection: JsonRejection) -> AppError {
    GameError::InvalidIntent(rejection.body_text()).into()
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let AppError::Game(e) = &self;
        let status = match e {
            GameError::UnknownPlayer | GameError::RoomNotFound => StatusCode::NOT_FOUND,
            GameError::DuplicatePlayer | GameError::RoomFull => StatusCode::CONFLICT,
            GameError::RoomClosed => StatusCode::GONE,
            GameError::InvalidIntent(_) => StatusCode::BAD_REQUEST,
            GameError::Throttled => StatusCode::TOO_MANY_REQUESTS,
        };
        let code = e.code();

        let body = serde_json::json!({
            "error": code,
            "message": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}
