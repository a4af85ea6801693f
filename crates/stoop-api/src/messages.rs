use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use stoop_types::api::{
    AnnouncementRequest, Claims, MarkReadRequest, MarkReadResponse, SendMessageRequest,
};
use stoop_types::{ChatError, Message, MessageKind, ReadPosition, SurfaceKind, SurfaceRef};

use crate::error_status;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the id of the oldest message from the
    /// previous page to fetch older messages.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

fn parse_surface(kind: &str, id: i64) -> Result<SurfaceRef, StatusCode> {
    SurfaceKind::from_str(kind)
        .map(|k| SurfaceRef::from_parts(k, id))
        .ok_or(StatusCode::NOT_FOUND)
}

fn core_error(err: ChatError) -> StatusCode {
    if let ChatError::Storage(ref detail) = err {
        error!("storage failure: {detail}");
    }
    error_status(&err)
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let surface = parse_surface(&kind, id)?;
    let db = state.db.clone();
    let limit = query.limit.min(200);
    let before = query.before;
    let user_id = claims.sub;

    // Run blocking store reads off the async runtime
    let messages: Vec<Message> = tokio::task::spawn_blocking(move || {
        if !db.is_participant(user_id, surface)? {
            return Err(ChatError::Forbidden);
        }
        db.list_page(surface, before, limit)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(core_error)?;

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let surface = parse_surface(&kind, id)?;
    let message = state
        .engine
        .send(claims.sub, surface, MessageKind::Chat, req.body, req.reply_to)
        .await
        .map_err(core_error)?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// System notice on an event/community thread, moderators only. Rides the
/// normal dispatch path with the system message kind.
pub async fn announce(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AnnouncementRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let surface = parse_surface(&kind, id)?;
    if surface.kind() == SurfaceKind::Private {
        return Err(StatusCode::METHOD_NOT_ALLOWED);
    }
    if !state.db.is_moderator(claims.sub, surface).map_err(core_error)? {
        return Err(StatusCode::FORBIDDEN);
    }

    let message = state
        .engine
        .send(claims.sub, surface, MessageKind::System, req.body, None)
        .await
        .map_err(core_error)?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i64)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let surface = parse_surface(&kind, id)?;
    let position = if surface.uses_message_marker() {
        ReadPosition::MessageId(req.position)
    } else {
        ReadPosition::Timestamp(req.position)
    };

    let updated = state
        .engine
        .mark_read(claims.sub, surface, position)
        .await
        .map_err(core_error)?;

    Ok(Json(MarkReadResponse { updated }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let message = state
        .engine
        .delete(claims.sub, message_id)
        .await
        .map_err(core_error)?;

    Ok(Json(message))
}
