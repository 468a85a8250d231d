//! Generic document CRUD over the per-collection tables.
//!
//! The free functions take a `&mut SqliteConnection` so they compose inside
//! one transaction (`&mut *tx`); the `ClinicStore` methods below wrap them
//! into the public, audited surface.

use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{Row, SqliteConnection};

use super::document::{
    from_document, matches_search, redact, Document, ListQuery, RecordKey,
};
use super::error::{StoreError, StoreResult};
use super::models::{log_audit, validate_shape, Actor, AuditAction, AuditLog, AuditLogListResponse, AuditLogQuery};
use super::schema::{Collection, IndexDef};
use super::ClinicStore;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_key<'q>(query: SqliteQuery<'q>, key: &RecordKey) -> SqliteQuery<'q> {
    match key {
        RecordKey::Int(id) => query.bind(*id),
        RecordKey::Text(key) => query.bind(key.clone()),
    }
}

/// Binds a JSON value the way `json_extract` would surface it to SQL
fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Document> {
    let data: String = row.try_get("data")?;
    Ok(serde_json::from_str(&data)?)
}

fn map_write_error(collection: Collection, err: sqlx::Error) -> StoreError {
    if StoreError::is_unique_violation(&err) {
        StoreError::validation(format!("Duplicate value for a unique field in {}", collection))
    } else {
        StoreError::Database(err)
    }
}

/// Key of a stored or about-to-be-stored document, if it carries one
pub(crate) fn key_of(collection: Collection, doc: &Document) -> Option<RecordKey> {
    doc.get(collection.key_field()).and_then(RecordKey::from_value)
}

pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
) -> StoreResult<Option<Document>> {
    let sql = format!("SELECT data FROM {} WHERE id = ?", collection.as_str());
    let row = bind_key(sqlx::query(&sql), key)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_document).transpose()
}

pub(crate) async fn fetch_all(
    conn: &mut SqliteConnection,
    collection: Collection,
) -> StoreResult<Vec<Document>> {
    let sql = format!("SELECT data FROM {} ORDER BY id", collection.as_str());
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    rows.iter().map(row_to_document).collect()
}

pub(crate) async fn fetch_by_index(
    conn: &mut SqliteConnection,
    collection: Collection,
    index: &IndexDef,
    value: &Value,
) -> StoreResult<Vec<Document>> {
    let sql = format!(
        "SELECT data FROM {} WHERE json_extract(data, '$.{}') IS ? ORDER BY id",
        collection.as_str(),
        index.field
    );
    let rows = bind_json(sqlx::query(&sql), value)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(row_to_document).collect()
}

/// Typed variant of [`fetch`]
pub(crate) async fn fetch_as<T: DeserializeOwned>(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
) -> StoreResult<Option<T>> {
    fetch(conn, collection, key)
        .await?
        .map(from_document)
        .transpose()
}

/// Fetches and deserializes a record that must exist
pub(crate) async fn require_as<T: DeserializeOwned>(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
) -> StoreResult<T> {
    fetch_as(conn, collection, key)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("{} record {} not found", collection, key)))
}

/// Normalizes a document and checks required fields and model shape.
///
/// Empty strings in unique fields become `null` so optional unique values
/// (patient email, national id) never collide on "".
pub(crate) fn prepare(collection: Collection, mut doc: Document) -> StoreResult<Document> {
    for idx in collection.indexes().iter().filter(|idx| idx.unique) {
        if let Some(Value::String(s)) = doc.get(idx.field) {
            if s.trim().is_empty() {
                doc.insert(idx.field.to_string(), Value::Null);
            }
        }
    }

    for field in collection.required_fields() {
        let present = match doc.get(*field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(StoreError::validation(format!(
                "Missing required field '{}' for {}",
                field, collection
            )));
        }
    }

    validate_shape(collection, &doc)?;
    Ok(doc)
}

/// Fails when another record already holds one of the document's unique values
pub(crate) async fn check_unique(
    conn: &mut SqliteConnection,
    collection: Collection,
    doc: &Document,
    exclude: Option<&RecordKey>,
) -> StoreResult<()> {
    for idx in collection.indexes().iter().filter(|idx| idx.unique) {
        let value = match doc.get(idx.field) {
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };
        let holders = fetch_by_index(&mut *conn, collection, idx, value).await?;
        let taken = holders
            .iter()
            .any(|holder| key_of(collection, holder).as_ref() != exclude);
        if taken {
            return Err(StoreError::validation(format!(
                "A record in {} with {} '{}' already exists",
                collection,
                idx.field,
                value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
            )));
        }
    }
    Ok(())
}

/// Raw insert: assigns a key when none is given, no validation, no audit.
/// Returns the stored document.
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    collection: Collection,
    doc: &Document,
) -> StoreResult<Document> {
    let table = collection.as_str();
    let mut stored = doc.clone();

    match key_of(collection, doc) {
        Some(key) => {
            if collection.is_auto_increment() && key.as_i64().is_none() {
                return Err(StoreError::validation(format!(
                    "{} ids must be integers",
                    collection
                )));
            }
            let sql = format!("INSERT INTO {} (id, data) VALUES (?, ?)", table);
            bind_key(sqlx::query(&sql), &key)
                .bind(serde_json::to_string(&stored)?)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_write_error(collection, e))?;
        }
        None if collection.is_auto_increment() => {
            stored.remove("id");
            let sql = format!("INSERT INTO {} (data) VALUES (?)", table);
            let result = sqlx::query(&sql)
                .bind(serde_json::to_string(&stored)?)
                .execute(&mut *conn)
                .await
                .map_err(|e| map_write_error(collection, e))?;

            let id = result.last_insert_rowid();
            stored.insert("id".to_string(), Value::from(id));
            let sql = format!("UPDATE {} SET data = ? WHERE id = ?", table);
            sqlx::query(&sql)
                .bind(serde_json::to_string(&stored)?)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
        None => {
            return Err(StoreError::validation(format!(
                "Missing key field '{}' for {}",
                collection.key_field(),
                collection
            )));
        }
    }

    Ok(stored)
}

/// Raw full-document replace. Returns false when the key does not exist.
pub(crate) async fn replace(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
    doc: &Document,
) -> StoreResult<bool> {
    let mut stored = doc.clone();
    stored.insert(collection.key_field().to_string(), key.to_value());

    let sql = format!("UPDATE {} SET data = ? WHERE id = ?", collection.as_str());
    let result = bind_key(
        sqlx::query(&sql).bind(serde_json::to_string(&stored)?),
        key,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| map_write_error(collection, e))?;
    Ok(result.rows_affected() > 0)
}

/// Raw delete. Returns false when the key does not exist.
pub(crate) async fn remove(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
) -> StoreResult<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?", collection.as_str());
    let result = bind_key(sqlx::query(&sql), key)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn ensure_mutable(collection: Collection) -> StoreResult<()> {
    if collection == Collection::AuditLogs {
        return Err(StoreError::validation("Audit logs are append-only"));
    }
    Ok(())
}

/// Validated, audited insert
pub(crate) async fn add_record(
    conn: &mut SqliteConnection,
    collection: Collection,
    doc: Document,
    actor: Actor,
) -> StoreResult<Document> {
    ensure_mutable(collection)?;
    let doc = prepare(collection, doc)?;

    if let Some(key) = key_of(collection, &doc) {
        if fetch(&mut *conn, collection, &key).await?.is_some() {
            return Err(StoreError::validation(format!(
                "A record in {} with key {} already exists",
                collection, key
            )));
        }
    }
    check_unique(&mut *conn, collection, &doc, None).await?;

    let stored = insert(&mut *conn, collection, &doc).await?;
    let key = key_of(collection, &stored);
    log_audit(
        conn,
        actor,
        AuditAction::Create,
        collection,
        key.as_ref(),
        Some(redact(collection, &stored)),
        None,
    )
    .await?;

    Ok(stored)
}

/// Validated, audited full replace. Secret fields the caller omitted are
/// carried over from the stored record.
pub(crate) async fn update_record(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
    mut doc: Document,
    actor: Actor,
) -> StoreResult<Document> {
    ensure_mutable(collection)?;
    let old = fetch(&mut *conn, collection, key)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("{} record {} not found", collection, key)))?;

    for field in collection.secret_fields() {
        if !doc.contains_key(*field) {
            if let Some(value) = old.get(*field) {
                doc.insert(field.to_string(), value.clone());
            }
        }
    }
    doc.insert(collection.key_field().to_string(), key.to_value());

    let doc = prepare(collection, doc)?;
    check_unique(&mut *conn, collection, &doc, Some(key)).await?;
    replace(&mut *conn, collection, key, &doc).await?;

    log_audit(
        conn,
        actor,
        AuditAction::Update,
        collection,
        Some(key),
        Some(redact(collection, &doc)),
        Some(redact(collection, &old)),
    )
    .await?;

    Ok(doc)
}

/// Audited delete; returns the removed record
pub(crate) async fn delete_record(
    conn: &mut SqliteConnection,
    collection: Collection,
    key: &RecordKey,
    actor: Actor,
) -> StoreResult<Document> {
    ensure_mutable(collection)?;
    let old = fetch(&mut *conn, collection, key)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("{} record {} not found", collection, key)))?;

    remove(&mut *conn, collection, key).await?;
    log_audit(
        conn,
        actor,
        AuditAction::Delete,
        collection,
        Some(key),
        None,
        Some(redact(collection, &old)),
    )
    .await?;

    Ok(old)
}

fn index_def(collection: Collection, index: &str) -> StoreResult<&'static IndexDef> {
    collection.index(index).ok_or_else(|| {
        StoreError::validation(format!("Unknown index '{}' on {}", index, collection))
    })
}

impl ClinicStore {
    /// Inserts a record (auto-assigning its id unless one is supplied) and
    /// appends a CREATE audit entry.
    pub async fn add(
        &self,
        collection: Collection,
        record: Document,
        actor: Actor,
    ) -> StoreResult<Document> {
        let mut tx = self.pool.begin().await?;
        let stored = add_record(&mut *tx, collection, record, actor).await?;
        tx.commit().await?;

        tracing::info!(
            collection = collection.as_str(),
            id = ?key_of(collection, &stored),
            "Record created"
        );
        Ok(redact(collection, &stored))
    }

    /// Replaces a record in full and appends an UPDATE audit entry holding
    /// both snapshots.
    pub async fn update(
        &self,
        collection: Collection,
        key: &RecordKey,
        record: Document,
        actor: Actor,
    ) -> StoreResult<Document> {
        let mut tx = self.pool.begin().await?;
        let stored = update_record(&mut *tx, collection, key, record, actor).await?;
        tx.commit().await?;

        tracing::info!(collection = collection.as_str(), id = %key, "Record updated");
        Ok(redact(collection, &stored))
    }

    pub async fn get(&self, collection: Collection, key: &RecordKey) -> StoreResult<Option<Document>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch(&mut *conn, collection, key)
            .await?
            .map(|doc| redact(collection, &doc)))
    }

    pub async fn get_all(&self, collection: Collection, query: &ListQuery) -> StoreResult<Vec<Document>> {
        let mut conn = self.pool.acquire().await?;
        let docs = fetch_all(&mut *conn, collection).await?;
        Ok(query
            .apply(docs)
            .iter()
            .map(|doc| redact(collection, doc))
            .collect())
    }

    /// Removes a record and appends a DELETE audit entry. Never cascades.
    pub async fn delete(
        &self,
        collection: Collection,
        key: &RecordKey,
        actor: Actor,
    ) -> StoreResult<Document> {
        let mut tx = self.pool.begin().await?;
        let old = delete_record(&mut *tx, collection, key, actor).await?;
        tx.commit().await?;

        tracing::info!(collection = collection.as_str(), id = %key, "Record deleted");
        Ok(redact(collection, &old))
    }

    /// First record whose indexed field equals `value`
    pub async fn get_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
    ) -> StoreResult<Option<Document>> {
        let def = index_def(collection, index)?;
        let mut conn = self.pool.acquire().await?;
        let docs = fetch_by_index(&mut *conn, collection, def, value).await?;
        Ok(docs.first().map(|doc| redact(collection, doc)))
    }

    pub async fn get_all_by_index(
        &self,
        collection: Collection,
        index: &str,
        value: &Value,
        query: &ListQuery,
    ) -> StoreResult<Vec<Document>> {
        let def = index_def(collection, index)?;
        let mut conn = self.pool.acquire().await?;
        let docs = fetch_by_index(&mut *conn, collection, def, value).await?;
        Ok(query
            .apply(docs)
            .iter()
            .map(|doc| redact(collection, doc))
            .collect())
    }

    /// Case-insensitive substring search over the named fields (full scan)
    pub async fn search(
        &self,
        collection: Collection,
        query: &str,
        fields: &[String],
    ) -> StoreResult<Vec<Document>> {
        let mut conn = self.pool.acquire().await?;
        let docs = fetch_all(&mut *conn, collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| matches_search(doc, query, fields))
            .map(|doc| redact(collection, &doc))
            .collect())
    }

    pub async fn count(&self, collection: Collection) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", collection.as_str());
        let count: (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count.0)
    }

    /// Typed read of one record
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &RecordKey,
    ) -> StoreResult<Option<T>> {
        let mut conn = self.pool.acquire().await?;
        fetch_as(&mut *conn, collection, key).await
    }

    /// Typed read of every record matching `query`
    pub async fn get_all_as<T: DeserializeOwned>(
        &self,
        collection: Collection,
        query: &ListQuery,
    ) -> StoreResult<Vec<T>> {
        let mut conn = self.pool.acquire().await?;
        let docs = fetch_all(&mut *conn, collection).await?;
        query.apply(docs).into_iter().map(from_document).collect()
    }

    pub async fn list_audit_logs(&self, query: &AuditLogQuery) -> StoreResult<AuditLogListResponse> {
        let entries: Vec<AuditLog> = self
            .get_all_as(Collection::AuditLogs, &query.to_list_query())
            .await?;
        Ok(query.paginate(entries))
    }
}
