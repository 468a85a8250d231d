use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{Invoice, InvoiceWithItems, NewInvoice, RevenueReport};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Deserialize)]
pub struct RevenueQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<NewInvoice>,
) -> Result<(StatusCode, Json<InvoiceWithItems>), ApiError> {
    let invoice = state.store.create_invoice(request, user.actor()).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceWithItems>, ApiError> {
    state
        .store
        .invoice_with_items(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Invoice {} not found", id)))
}

pub async fn pay_invoice(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payment): Json<PaymentRequest>,
) -> Result<Json<Invoice>, ApiError> {
    let invoice = state
        .store
        .mark_invoice_paid(id, payment.payment_method, user.actor())
        .await?;
    Ok(Json(invoice))
}

pub async fn revenue_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<RevenueReport>, ApiError> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(ApiError::validation("'from' must not be after 'to'"));
        }
    }
    Ok(Json(state.store.revenue_report(query.from, query.to).await?))
}
