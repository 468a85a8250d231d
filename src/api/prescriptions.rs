use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{Prescription, PrescriptionItem, PrescriptionWithItems};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

/// Prescription header fields plus its items
#[derive(Deserialize)]
pub struct NewPrescription {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
}

pub async fn create_prescription(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<NewPrescription>,
) -> Result<(StatusCode, Json<PrescriptionWithItems>), ApiError> {
    let created = state
        .store
        .create_prescription(request.prescription, request.items, user.actor())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_prescription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<PrescriptionWithItems>, ApiError> {
    state
        .store
        .prescription_with_items(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Prescription {} not found", id)))
}

pub async fn refill_prescription(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<PrescriptionWithItems>), ApiError> {
    let refill = state.store.refill_prescription(id, user.actor()).await?;
    Ok((StatusCode::CREATED, Json(refill)))
}
