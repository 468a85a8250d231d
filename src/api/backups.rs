use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{Backup, BackupSummary, BackupType, ExportDocument};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Deserialize)]
pub struct ExportQuery {
    /// Comma-separated collection names
    pub tables: Option<String>,
}

pub async fn list_backups(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<BackupSummary>>, ApiError> {
    user.require_admin()?;
    Ok(Json(state.store.list_backups().await?))
}

pub async fn create_backup(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<(StatusCode, Json<BackupSummary>), ApiError> {
    user.require_admin()?;
    let summary = state
        .store
        .create_backup(BackupType::Manual, user.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_backup(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Backup>, ApiError> {
    user.require_admin()?;
    state
        .store
        .get_backup(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Backup {} not found", id)))
}

pub async fn export_data(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportDocument>, ApiError> {
    user.require_admin()?;
    let tables = query.tables.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });
    Ok(Json(state.store.export_data(tables).await?))
}
