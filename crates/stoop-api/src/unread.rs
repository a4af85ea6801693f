use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use stoop_types::api::Claims;

use crate::error_status;
use crate::state::AppState;

/// Badge payload: sparse per-surface counts over event threads plus the
/// EVENT / NOTIFICATION totals the client renders.
pub async fn badge(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let aggregator = state.unread.clone();
    let user_id = claims.sub;

    let badge = tokio::task::spawn_blocking(move || aggregator.badge(user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| error_status(&e))?;

    Ok(Json(badge))
}

/// Full per-surface unread view across all three surface kinds.
pub async fn overview(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let aggregator = state.unread.clone();
    let user_id = claims.sub;

    let overview = tokio::task::spawn_blocking(move || aggregator.overview(user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| error_status(&e))?;

    Ok(Json(overview))
}
