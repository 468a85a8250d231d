//! Backups and data export.
//!
//! Both produce the same export document. Secret fields (password hashes,
//! session token digests) are stripped before anything is serialized.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;

use super::settings::{number_setting, store_setting_value, text_setting};
use crate::db::document::{from_document, redact, to_document, RecordKey};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{
    log_audit, Actor, AuditAction, Backup, BackupSummary, BackupType, ExportDocument,
    ExportMetadata, DEFAULT_MAX_BACKUPS, EXPORT_VERSION,
};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

/// Collections included when the caller does not pick any
fn default_tables() -> Vec<Collection> {
    Collection::ALL
        .iter()
        .copied()
        .filter(|c| *c != Collection::Backups)
        .collect()
}

fn resolve_tables(names: &[String]) -> StoreResult<Vec<Collection>> {
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let collection = Collection::from_str(name)
            .ok_or_else(|| StoreError::validation(format!("Unknown table '{}'", name)))?;
        if !tables.contains(&collection) {
            tables.push(collection);
        }
    }
    Ok(tables)
}

pub(crate) async fn build_export(
    conn: &mut SqliteConnection,
    tables: &[Collection],
) -> StoreResult<ExportDocument> {
    let clinic_name = text_setting(&mut *conn, "clinicName", "Clinic").await?;

    let mut data = BTreeMap::new();
    for collection in tables {
        let records = store::fetch_all(&mut *conn, *collection)
            .await?
            .iter()
            .map(|doc| Value::Object(redact(*collection, doc)))
            .collect();
        data.insert(collection.as_str().to_string(), records);
    }

    Ok(ExportDocument {
        metadata: ExportMetadata {
            export_date: Utc::now(),
            version: EXPORT_VERSION.to_string(),
            clinic_name,
            included_tables: tables.iter().map(|c| c.as_str().to_string()).collect(),
        },
        data,
    })
}

async fn stored_backups(conn: &mut SqliteConnection) -> StoreResult<Vec<Backup>> {
    let mut backups: Vec<Backup> = store::fetch_all(conn, Collection::Backups)
        .await?
        .into_iter()
        .map(from_document)
        .collect::<StoreResult<_>>()?;
    backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(backups)
}

fn summary_document(backup: &Backup) -> StoreResult<crate::db::Document> {
    to_document(&BackupSummary::from(backup.clone()))
}

/// Deletes the oldest backups beyond `keep`
async fn prune_backups(conn: &mut SqliteConnection, keep: usize, actor: Actor) -> StoreResult<usize> {
    let backups = stored_backups(&mut *conn).await?;
    let excess = backups.len().saturating_sub(keep);

    for backup in backups.iter().take(excess) {
        let Some(id) = backup.id else {
            continue;
        };
        let key = RecordKey::Int(id);
        store::remove(&mut *conn, Collection::Backups, &key).await?;
        log_audit(
            &mut *conn,
            actor,
            AuditAction::Delete,
            Collection::Backups,
            Some(&key),
            None,
            Some(summary_document(backup)?),
        )
        .await?;
    }
    Ok(excess)
}

impl ClinicStore {
    /// Serializes every collection except backups into a stored backup, then
    /// prunes the oldest backups beyond `maxBackups`.
    pub async fn create_backup(&self, backup_type: BackupType, actor: Actor) -> StoreResult<BackupSummary> {
        let mut tx = self.pool.begin().await?;
        let export = build_export(&mut *tx, &default_tables()).await?;
        let data = serde_json::to_string(&export)?;

        let backup = Backup {
            id: None,
            backup_type,
            created_at: export.metadata.export_date,
            created_by: actor.user_id(),
            size_bytes: data.len() as i64,
            version: export.metadata.version.clone(),
            included_tables: export.metadata.included_tables.clone(),
            record_count: export.record_count() as i64,
            data,
        };

        // The dump itself is kept out of the audit trail.
        let stored = store::insert(&mut *tx, Collection::Backups, &to_document(&backup)?).await?;
        let backup: Backup = from_document(stored)?;
        let key = backup.id.map(RecordKey::Int);
        log_audit(
            &mut *tx,
            actor,
            AuditAction::Create,
            Collection::Backups,
            key.as_ref(),
            Some(summary_document(&backup)?),
            None,
        )
        .await?;

        let keep = number_setting(&mut *tx, "maxBackups", DEFAULT_MAX_BACKUPS as f64).await?;
        let pruned = prune_backups(&mut *tx, keep.max(1.0) as usize, actor).await?;
        store_setting_value(
            &mut *tx,
            "lastBackupDate",
            &Value::from(backup.created_at.format("%Y-%m-%d").to_string()),
        )
        .await?;
        tx.commit().await?;

        let summary = BackupSummary::from(backup);
        tracing::info!(
            backup_id = summary.id,
            backup_type = %summary.backup_type,
            size = %summary.size_human,
            records = summary.record_count,
            pruned = pruned,
            "Backup created"
        );
        Ok(summary)
    }

    /// Export of the named tables, or of everything except backups
    pub async fn export_data(&self, tables: Option<Vec<String>>) -> StoreResult<ExportDocument> {
        let tables = match tables {
            Some(names) if !names.is_empty() => resolve_tables(&names)?,
            _ => default_tables(),
        };
        let mut conn = self.pool.acquire().await?;
        let export = build_export(&mut *conn, &tables).await?;

        tracing::info!(
            tables = export.metadata.included_tables.len(),
            records = export.record_count(),
            "Data exported"
        );
        Ok(export)
    }

    /// Backup metadata, newest first
    pub async fn list_backups(&self) -> StoreResult<Vec<BackupSummary>> {
        let mut conn = self.pool.acquire().await?;
        let mut backups = stored_backups(&mut *conn).await?;
        backups.reverse();
        Ok(backups.into_iter().map(BackupSummary::from).collect())
    }

    /// Full backup including its export document
    pub async fn get_backup(&self, id: i64) -> StoreResult<Option<Backup>> {
        let mut conn = self.pool.acquire().await?;
        store::fetch_as(&mut *conn, Collection::Backups, &RecordKey::Int(id)).await
    }
}
