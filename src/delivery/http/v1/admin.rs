use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};

use crate::delivery::http::v1::middleware::AuthenticatedUser;
use crate::usecase::error::UsecaseError;
use crate::AppState;

pub(crate) fn require_admin(user: &AuthenticatedUser) -> Result<(), UsecaseError> {
    if user.role != "admin" {
        tracing::warn!(user_id = %user.user_id, role = %user.role, "non-admin access attempt to admin endpoint");
        return Err(UsecaseError::Forbidden("Admin access required".to_string()));
    }
    Ok(())
}

#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn get_queue_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_admin(&user)?;

    let stats = state.pipeline.queue_stats().await?;

    tracing::debug!(?stats, "queue stats retrieved");
    Ok((StatusCode::OK, Json(stats)))
}

/// Runs one delivery cycle immediately. Waits for a scheduled cycle that is
/// already in progress.
#[tracing::instrument(skip(state), fields(user_id = %user.user_id))]
pub async fn flush_queue(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, UsecaseError> {
    require_admin(&user)?;

    let report = state.pipeline.run_once().await?;

    tracing::info!(admin = %user.email, ?report, "notification queue flushed manually");
    Ok((StatusCode::OK, Json(report)))
}
