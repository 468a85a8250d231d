//! Settings reads and updates.

use serde_json::{Map, Value};
use sqlx::SqliteConnection;

use crate::db::document::{to_document, ListQuery, RecordKey, SortOrder};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{log_audit, Actor, AuditAction, Setting, SettingValue};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

pub(crate) async fn load_setting(
    conn: &mut SqliteConnection,
    key: &str,
) -> StoreResult<Option<Setting>> {
    store::fetch_as(conn, Collection::Settings, &RecordKey::from(key)).await
}

pub(crate) async fn number_setting(
    conn: &mut SqliteConnection,
    key: &str,
    default: f64,
) -> StoreResult<f64> {
    Ok(load_setting(conn, key)
        .await?
        .and_then(|s| s.value.as_f64())
        .unwrap_or(default))
}

pub(crate) async fn bool_setting(
    conn: &mut SqliteConnection,
    key: &str,
    default: bool,
) -> StoreResult<bool> {
    Ok(load_setting(conn, key)
        .await?
        .and_then(|s| s.value.as_bool())
        .unwrap_or(default))
}

/// Text setting; empty values fall back to `default`
pub(crate) async fn text_setting(
    conn: &mut SqliteConnection,
    key: &str,
    default: &str,
) -> StoreResult<String> {
    Ok(load_setting(conn, key)
        .await?
        .and_then(|s| s.value.as_str().map(str::to_string))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string()))
}

/// Overwrites a stored setting's value without auditing; used for
/// bookkeeping values (invoice counter, last backup date) that are written
/// as part of a larger audited operation.
pub(crate) async fn store_setting_value(
    conn: &mut SqliteConnection,
    key: &str,
    value: &Value,
) -> StoreResult<()> {
    let mut setting = load_setting(&mut *conn, key)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("Setting '{}' not found", key)))?;
    setting.set_value(value).map_err(StoreError::validation)?;
    store::replace(
        conn,
        Collection::Settings,
        &RecordKey::from(key),
        &to_document(&setting)?,
    )
    .await?;
    Ok(())
}

impl ClinicStore {
    pub async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        let mut conn = self.pool.acquire().await?;
        load_setting(&mut *conn, key).await
    }

    /// Typed value of one setting
    pub async fn setting_value(&self, key: &str) -> StoreResult<Option<SettingValue>> {
        Ok(self.get_setting(key).await?.map(|s| s.value))
    }

    /// Every setting, ordered by category then key
    pub async fn get_settings(&self) -> StoreResult<Vec<Setting>> {
        let mut settings: Vec<Setting> = self
            .get_all_as(Collection::Settings, &ListQuery::new())
            .await?;
        settings.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.key.cmp(&b.key)));
        Ok(settings)
    }

    pub async fn settings_by_category(&self, category: &str) -> StoreResult<Vec<Setting>> {
        self.get_all_as(
            Collection::Settings,
            &ListQuery::new()
                .filter("category", category)
                .sort_by("key", SortOrder::Asc),
        )
        .await
    }

    /// Overwrites one setting's value, validated against its declared type
    pub async fn update_setting(&self, key: &str, value: Value, actor: Actor) -> StoreResult<Setting> {
        let mut tx = self.pool.begin().await?;
        let mut setting = load_setting(&mut *tx, key)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Setting '{}' not found", key)))?;
        setting.set_value(&value).map_err(StoreError::validation)?;

        store::update_record(
            &mut *tx,
            Collection::Settings,
            &RecordKey::from(key),
            to_document(&setting)?,
            actor,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(key = key, "Setting updated");
        Ok(setting)
    }

    /// Applies several updates atomically with a single BULK_UPDATE audit
    /// entry. Any unknown key or invalid value rejects the whole batch.
    pub async fn update_multiple_settings(
        &self,
        updates: Vec<(String, Value)>,
        actor: Actor,
    ) -> StoreResult<Vec<Setting>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut old_values = Map::new();
        let mut new_values = Map::new();
        let mut updated = Vec::with_capacity(updates.len());

        for (key, value) in updates {
            let mut setting = load_setting(&mut *tx, &key)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("Setting '{}' not found", key)))?;
            old_values.insert(key.clone(), setting.value.to_json());
            setting.set_value(&value).map_err(StoreError::validation)?;
            new_values.insert(key.clone(), setting.value.to_json());

            store::replace(
                &mut *tx,
                Collection::Settings,
                &RecordKey::from(key.as_str()),
                &to_document(&setting)?,
            )
            .await?;
            updated.push(setting);
        }

        log_audit(
            &mut *tx,
            actor,
            AuditAction::BulkUpdate,
            Collection::Settings,
            None,
            Some(new_values),
            Some(old_values),
        )
        .await?;
        tx.commit().await?;

        tracing::info!(count = updated.len(), "Settings updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AuditLog;
    use crate::db::test_support::test_store;
    use serde_json::json;

    #[tokio::test]
    async fn test_seeded_settings_are_typed() {
        let (store, _dir) = test_store().await;
        assert_eq!(
            store.setting_value("taxRate").await.unwrap(),
            Some(SettingValue::Number(15.0))
        );
        assert_eq!(
            store.setting_value("autoBackup").await.unwrap(),
            Some(SettingValue::Boolean(true))
        );
        let billing = store.settings_by_category("billing").await.unwrap();
        assert!(billing.iter().any(|s| s.key == "invoicePrefix"));
        assert!(billing.iter().all(|s| s.category == "billing"));
    }

    #[tokio::test]
    async fn test_update_setting_validates_type() {
        let (store, _dir) = test_store().await;
        let err = store
            .update_setting("taxRate", json!("a lot"), Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let updated = store
            .update_setting("taxRate", json!("12.5"), Actor::User(1))
            .await
            .unwrap();
        assert_eq!(updated.value, SettingValue::Number(12.5));

        let err = store
            .update_setting("noSuchSetting", json!(1), Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bulk_update_is_atomic_with_one_audit_entry() {
        let (store, _dir) = test_store().await;

        let err = store
            .update_multiple_settings(
                vec![
                    ("clinicName".to_string(), json!("Harbour Clinic")),
                    ("maxBackups".to_string(), json!("many")),
                ],
                Actor::User(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(
            store.setting_value("clinicName").await.unwrap(),
            Some(SettingValue::Text("Clinic".to_string()))
        );

        store
            .update_multiple_settings(
                vec![
                    ("clinicName".to_string(), json!("Harbour Clinic")),
                    ("maxBackups".to_string(), json!(3)),
                ],
                Actor::User(1),
            )
            .await
            .unwrap();

        let bulk: Vec<AuditLog> = store
            .get_all_as(
                Collection::AuditLogs,
                &ListQuery::new().filter("action", "BULK_UPDATE"),
            )
            .await
            .unwrap();
        assert_eq!(bulk.len(), 1);
        let new_data = bulk[0].new_data.as_ref().unwrap();
        assert_eq!(new_data["clinicName"], "Harbour Clinic");
        assert_eq!(bulk[0].old_data.as_ref().unwrap()["maxBackups"], 10.0);
    }
}
