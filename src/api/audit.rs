//! Audit log API endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;

use crate::db::{AuditLogListResponse, AuditLogQuery};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

/// List audit logs with filtering and pagination
///
/// Query parameters:
/// - userId: Filter by acting user
/// - action: Filter by action (e.g., "CREATE", "BULK_UPDATE")
/// - table: Filter by collection name
/// - recordId: Filter by affected record
/// - page: Page number (1-indexed, defaults to 1)
/// - perPage: Items per page (defaults to 50, max 100)
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogListResponse>, ApiError> {
    user.require_admin()?;
    let result = state.store.list_audit_logs(&query).await?;
    Ok(Json(result))
}
