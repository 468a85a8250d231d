//! Generic collection endpoints: CRUD, index lookup and search.
//!
//! Sessions are never exposed here. Audit logs and backups are read-only and
//! admin-only, settings are writable by admins only. User creation is routed
//! through the hashing path; password hashes sent by clients are ignored.
//! Non-admins may edit their own account but not its role or status.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{Collection, Document, ListQuery, NewUser, RecordKey, SortOrder};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

/// Query keys that configure a listing instead of filtering it
const RESERVED_PARAMS: [&str; 2] = ["sortBy", "order"];

/// Account fields only an administrator may change
const PROTECTED_USER_FIELDS: [&str; 2] = ["role", "isActive"];

fn resolve(name: &str, user: &CurrentUser) -> Result<Collection, ApiError> {
    let collection = Collection::from_str(name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown collection '{}'", name)))?;
    match collection {
        Collection::Sessions => Err(ApiError::forbidden("Sessions are not accessible")),
        Collection::AuditLogs | Collection::Backups => {
            user.require_admin()?;
            Ok(collection)
        }
        _ => Ok(collection),
    }
}

fn resolve_writable(name: &str, user: &CurrentUser) -> Result<Collection, ApiError> {
    let collection = resolve(name, user)?;
    match collection {
        Collection::AuditLogs | Collection::Backups => {
            Err(ApiError::forbidden(format!("{} is read-only", collection)))
        }
        Collection::Settings => {
            user.require_admin()?;
            Ok(collection)
        }
        _ => Ok(collection),
    }
}

/// Keeps the stored role and status on a self-edit, refusing any change
async fn pin_account_fields(
    state: &AppState,
    key: &RecordKey,
    doc: &mut Document,
) -> Result<(), ApiError> {
    let stored = state
        .store
        .get(Collection::Users, key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("users record {} not found", key)))?;
    for field in PROTECTED_USER_FIELDS {
        let Some(current) = stored.get(field) else {
            continue;
        };
        match doc.get(field) {
            Some(requested) if requested != current => {
                return Err(ApiError::forbidden(format!(
                    "Only administrators can change '{}'",
                    field
                )));
            }
            _ => {
                doc.insert(field.to_string(), current.clone());
            }
        }
    }
    Ok(())
}

fn parse_key(collection: Collection, raw: &str) -> Result<RecordKey, ApiError> {
    Ok(RecordKey::parse_for(collection, raw)?)
}

/// Query-string values are matched as JSON scalars when they parse as one
fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}

fn list_query(params: &HashMap<String, String>) -> ListQuery {
    let mut query = ListQuery::new();
    let mut filters: Vec<(&String, &String)> = params
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .collect();
    filters.sort();
    for (field, value) in filters {
        query = query.filter(field.clone(), parse_scalar(value));
    }
    if let Some(field) = params.get("sortBy") {
        let order = params
            .get("order")
            .and_then(|o| SortOrder::from_str(o))
            .unwrap_or(SortOrder::Asc);
        query = query.sort_by(field.clone(), order);
    }
    query
}

fn body_document(body: Value) -> Result<Document, ApiError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(ApiError::bad_request("Request body must be a JSON object")),
    }
}

fn strip_client_secrets(collection: Collection, doc: &mut Document) {
    for field in collection.secret_fields() {
        doc.remove(*field);
    }
}

pub async fn list_records(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let collection = resolve(&name, &user)?;
    let records = state.store.get_all(collection, &list_query(&params)).await?;
    Ok(Json(records))
}

pub async fn get_record(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<Document>, ApiError> {
    let collection = resolve(&name, &user)?;
    let key = parse_key(collection, &id)?;
    let record = state
        .store
        .get(collection, &key)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{} record {} not found", collection, key)))?;
    Ok(Json(record))
}

pub async fn create_record(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let collection = resolve_writable(&name, &user)?;

    if collection == Collection::Users {
        user.require_admin()?;
        let new_user: NewUser = serde_json::from_value(body)
            .map_err(|e| ApiError::validation(format!("Invalid user: {}", e)))?;
        let created = state.store.create_user(new_user, user.actor()).await?;
        let created = serde_json::to_value(created)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        return Ok((StatusCode::CREATED, Json(created)));
    }

    let mut doc = body_document(body)?;
    strip_client_secrets(collection, &mut doc);
    let created = state.store.add(collection, doc, user.actor()).await?;
    Ok((StatusCode::CREATED, Json(Value::Object(created))))
}

pub async fn update_record(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((name, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Document>, ApiError> {
    let collection = resolve_writable(&name, &user)?;
    let key = parse_key(collection, &id)?;
    let mut doc = body_document(body)?;
    strip_client_secrets(collection, &mut doc);

    if collection == Collection::Users && user.require_admin().is_err() {
        if key != RecordKey::Int(user.0.id) {
            return Err(ApiError::forbidden("Administrator access required"));
        }
        pin_account_fields(&state, &key, &mut doc).await?;
    }

    let updated = state.store.update(collection, &key, doc, user.actor()).await?;
    Ok(Json(updated))
}

pub async fn delete_record(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((name, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let collection = resolve_writable(&name, &user)?;
    if collection == Collection::Users {
        user.require_admin()?;
    }
    let key = parse_key(collection, &id)?;
    state.store.delete(collection, &key, user.actor()).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn records_by_index(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path((name, index, value)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let collection = resolve(&name, &user)?;
    let records = state
        .store
        .get_all_by_index(collection, &index, &parse_scalar(&value), &list_query(&params))
        .await?;
    Ok(Json(records))
}

pub async fn search_records(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let collection = resolve(&name, &user)?;
    let query = params.get("q").map(String::as_str).unwrap_or_default();
    let fields: Vec<String> = params
        .get("fields")
        .map(|f| {
            f.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if fields.is_empty() {
        return Err(ApiError::validation("At least one search field is required"));
    }

    let records = state.store.search(collection, query, &fields).await?;
    Ok(Json(records))
}
