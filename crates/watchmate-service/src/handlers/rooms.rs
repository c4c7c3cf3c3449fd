//! Room handlers.
//!
//! - `POST /api/v1/rooms` - Create room
//! - `GET /api/v1/rooms/{code}` - Get room
//! - `POST /api/v1/rooms/{code}/verify-password` - Check a room password
//!
//! Responses never carry the stored password hash. The host token is only
//! returned by creation.

use crate::errors::PartyError;
use crate::models::{
    CreateRoomRequest, CreateRoomResponse, RoomResponse, VerifyPasswordRequest,
    VerifyPasswordResponse,
};
use crate::rooms::RoomCode;
use crate::routes::AppState;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handler for POST /api/v1/rooms
///
/// # Response
///
/// - 201 Created: `{roomCode, hostToken, isPrivate}`
/// - 400 Bad Request: Invalid body, or private room without a password
/// - 503 Service Unavailable: Room capacity reached or shutting down
#[instrument(
    skip_all,
    name = "wm.room.create",
    fields(method = "POST", endpoint = "/api/v1/rooms")
)]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<CreateRoomResponse>), PartyError> {
    // Deserialize manually to return 400 (not Axum's default 422)
    let request: CreateRoomRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(target: "wm.handlers.rooms", error = %e, "Invalid request body");
        PartyError::Validation("Invalid request body".to_string())
    })?;

    let created = state
        .controller
        .create_room(request.is_private, request.password)
        .await?;

    info!(
        target: "wm.handlers.rooms",
        room_code = %created.room.code,
        is_private = created.room.is_private,
        "Room created via API"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_code: created.room.code.to_string(),
            host_token: created.host_token,
            is_private: created.room.is_private,
        }),
    ))
}

/// Handler for GET /api/v1/rooms/{code}
///
/// Codes are matched case-insensitively.
#[instrument(
    skip_all,
    name = "wm.room.get",
    fields(method = "GET", endpoint = "/api/v1/rooms/{code}")
)]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<RoomResponse>, PartyError> {
    let code = RoomCode::parse(&code)?;
    let entry = state.controller.lookup_room(&code).await?;

    Ok(Json(RoomResponse {
        room_code: entry.room.code.to_string(),
        created_at: entry.room.created_at,
        is_private: entry.room.is_private,
    }))
}

/// Handler for POST /api/v1/rooms/{code}/verify-password
///
/// # Response
///
/// - 200 OK: `{valid: true}` (always, for public rooms)
/// - 401 Unauthorized: Wrong password
/// - 404 Not Found: Unknown room
#[instrument(
    skip_all,
    name = "wm.room.verify_password",
    fields(method = "POST", endpoint = "/api/v1/rooms/{code}/verify-password")
)]
pub async fn verify_password(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    body: axum::body::Bytes,
) -> Result<Json<VerifyPasswordResponse>, PartyError> {
    let request: VerifyPasswordRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(target: "wm.handlers.rooms", error = %e, "Invalid request body");
        PartyError::Validation("Invalid request body".to_string())
    })?;

    let code = RoomCode::parse(&code)?;
    let valid = state
        .controller
        .verify_password(&code, request.password)
        .await?;

    if !valid {
        debug!(
            target: "wm.handlers.rooms",
            room_code = %code,
            "Password verification failed"
        );
        return Err(PartyError::Unauthorized("Incorrect password".to_string()));
    }

    Ok(Json(VerifyPasswordResponse { valid: true }))
}
