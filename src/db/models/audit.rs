//! Audit log models for tracking who changed what.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::db::document::{to_document, Document, ListQuery, RecordKey, SortOrder};
use crate::db::error::StoreResult;
use crate::db::schema::Collection;
use crate::db::store;

/// Who is performing a mutation. Every write path takes one, so every
/// write is audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A signed-in user
    User(i64),
    /// Seeding, maintenance loops and other internal work
    System,
}

impl Actor {
    pub fn user_id(&self) -> Option<i64> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    BulkUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::BulkUpdate => "BULK_UPDATE",
        }
    }
}

/// Append-only audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub table: String,
    pub record_id: Option<RecordKey>,
    pub new_data: Option<Value>,
    pub old_data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// Query parameters for filtering audit logs
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub user_id: Option<i64>,
    pub action: Option<AuditAction>,
    pub table: Option<String>,
    pub record_id: Option<String>,
    /// Page number (1-indexed, defaults to 1)
    pub page: Option<i64>,
    /// Items per page (defaults to 50, max 100)
    pub per_page: Option<i64>,
}

/// Response for listing audit logs with pagination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogListResponse {
    pub items: Vec<AuditLog>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

/// Append an audit entry inside the caller's transaction
pub async fn log_audit(
    conn: &mut SqliteConnection,
    actor: Actor,
    action: AuditAction,
    collection: Collection,
    record_id: Option<&RecordKey>,
    new_data: Option<Document>,
    old_data: Option<Document>,
) -> StoreResult<()> {
    let entry = AuditLog {
        id: None,
        user_id: actor.user_id(),
        action,
        table: collection.as_str().to_string(),
        record_id: record_id.cloned(),
        new_data: new_data.map(Value::Object),
        old_data: old_data.map(Value::Object),
        timestamp: Utc::now(),
    };
    let doc = to_document(&entry)?;
    store::insert(conn, Collection::AuditLogs, &doc).await?;

    tracing::debug!(
        action = action.as_str(),
        table = collection.as_str(),
        record_id = ?record_id,
        user_id = ?actor.user_id(),
        "Audit log recorded"
    );

    Ok(())
}

impl AuditLogQuery {
    pub(crate) fn to_list_query(&self) -> ListQuery {
        let mut query = ListQuery::new().sort_by("timestamp", SortOrder::Desc);
        if let Some(user_id) = self.user_id {
            query = query.filter("userId", user_id);
        }
        if let Some(action) = self.action {
            query = query.filter("action", action.as_str());
        }
        if let Some(table) = &self.table {
            query = query.filter("table", table.as_str());
        }
        query
    }

    pub(crate) fn paginate(&self, mut items: Vec<AuditLog>) -> AuditLogListResponse {
        if let Some(record_id) = &self.record_id {
            items.retain(|entry| {
                entry
                    .record_id
                    .as_ref()
                    .map(|k| k.to_string() == *record_id)
                    .unwrap_or(false)
            });
        }

        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(50).clamp(1, 100);
        let total = items.len() as i64;
        let total_pages = (total as f64 / per_page as f64).ceil() as i64;

        let items = items
            .into_iter()
            .skip(((page - 1) * per_page) as usize)
            .take(per_page as usize)
            .collect();

        AuditLogListResponse {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: i64) -> AuditLog {
        AuditLog {
            id: Some(n),
            user_id: Some(1),
            action: AuditAction::Update,
            table: "patients".to_string(),
            record_id: Some(RecordKey::Int(n % 3)),
            new_data: None,
            old_data: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_action_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_value(AuditAction::BulkUpdate).unwrap(),
            serde_json::json!("BULK_UPDATE")
        );
        assert_eq!(AuditAction::Logout.as_str(), "LOGOUT");
    }

    #[test]
    fn test_paginate_clamps_and_filters_record_id() {
        let items: Vec<AuditLog> = (0..9).map(entry).collect();

        let query = AuditLogQuery {
            record_id: Some("1".to_string()),
            per_page: Some(2),
            page: Some(2),
            ..Default::default()
        };
        let page = query.paginate(items.clone());
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);

        let query = AuditLogQuery {
            per_page: Some(1000),
            page: Some(0),
            ..Default::default()
        };
        let page = query.paginate(items);
        assert_eq!(page.per_page, 100);
        assert_eq!(page.page, 1);
        assert_eq!(page.items.len(), 9);
    }

    #[test]
    fn test_actor_user_id() {
        assert_eq!(Actor::User(4).user_id(), Some(4));
        assert_eq!(Actor::System.user_id(), None);
    }
}
