use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::Setting;
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Deserialize)]
pub struct CategoryQuery {
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct SettingUpdate {
    pub value: Value,
}

pub async fn list_settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CategoryQuery>,
) -> Result<Json<Vec<Setting>>, ApiError> {
    let settings = match query.category {
        Some(category) => state.store.settings_by_category(&category).await?,
        None => state.store.get_settings().await?,
    };
    Ok(Json(settings))
}

pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Setting>, ApiError> {
    state
        .store
        .get_setting(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Setting '{}' not found", key)))
}

pub async fn update_setting(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(key): Path<String>,
    Json(update): Json<SettingUpdate>,
) -> Result<Json<Setting>, ApiError> {
    user.require_admin()?;
    Ok(Json(state.store.update_setting(&key, update.value, user.actor()).await?))
}

/// Body is a `{key: value}` map applied as one batch
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(updates): Json<BTreeMap<String, Value>>,
) -> Result<Json<Vec<Setting>>, ApiError> {
    user.require_admin()?;
    let updates = updates.into_iter().collect();
    Ok(Json(
        state.store.update_multiple_settings(updates, user.actor()).await?,
    ))
}
