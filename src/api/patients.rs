use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{MedicalRecord, Patient};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn register_patient(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(patient): Json<Patient>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let patient = state.store.add_patient(patient, user.actor()).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn search_patients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    if query.q.trim().is_empty() {
        return Ok(Json(state.store.active_patients().await?));
    }
    Ok(Json(state.store.search_patients(query.q.trim()).await?))
}

pub async fn patient_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<MedicalRecord>>, ApiError> {
    Ok(Json(state.store.patient_history(id).await?))
}

pub async fn add_medical_record(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(record): Json<MedicalRecord>,
) -> Result<(StatusCode, Json<MedicalRecord>), ApiError> {
    let record = state.store.add_medical_record(record, user.actor()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
