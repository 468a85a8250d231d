use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::db::{Collection, Notification, RecordKey};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

/// Unread notifications for the calling user, newest first
pub async fn list_unread(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<Notification>>, ApiError> {
    Ok(Json(state.store.unread_notifications(user.0.id).await?))
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Notification>, ApiError> {
    let notification: Notification = state
        .store
        .get_as(Collection::Notifications, &RecordKey::Int(id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Notification {} not found", id)))?;
    if notification.user_id != user.0.id {
        user.require_admin()?;
    }
    Ok(Json(state.store.mark_notification_read(id, user.actor()).await?))
}
