use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Appointment, AppointmentConflict, AppointmentRequest, AppointmentStatus, ConflictStats};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflict: Option<AppointmentConflict>,
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: AppointmentStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayQuery {
    pub doctor_id: Option<i64>,
}

pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<AppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    let appointment = state.store.add_appointment(request, user.actor()).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn check_conflict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AppointmentRequest>,
) -> Result<Json<ConflictCheckResponse>, ApiError> {
    let conflict = state.store.check_appointment_conflict(&request).await?;
    Ok(Json(ConflictCheckResponse {
        has_conflict: conflict.is_some(),
        conflict,
    }))
}

pub async fn conflict_stats(State(state): State<Arc<AppState>>) -> Result<Json<ConflictStats>, ApiError> {
    Ok(Json(state.store.appointment_conflict_stats().await?))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Appointment>, ApiError> {
    let appointment = state
        .store
        .update_appointment_status(id, update.status, user.actor())
        .await?;
    Ok(Json(appointment))
}

pub async fn appointments_for_day(
    State(state): State<Arc<AppState>>,
    Path(day): Path<String>,
    Query(query): Query<DayQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
        .map_err(|_| ApiError::validation("Date must be YYYY-MM-DD"))?;
    Ok(Json(state.store.appointments_for_day(day, query.doctor_id).await?))
}
