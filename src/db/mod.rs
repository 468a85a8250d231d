pub mod document;
pub mod error;
pub mod locks;
pub mod models;
pub mod schema;
mod seeders;
pub(crate) mod store;

pub use document::{Document, ListQuery, RecordKey, SortOrder};
pub use error::{StoreError, StoreResult};
pub use models::*;
pub use schema::Collection;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AuthConfig, Config};
use locks::KeyedLocks;

pub type DbPool = SqlitePool;

/// Handle to the clinic data store. Cheap to clone; clones share the pool
/// and the lock table.
#[derive(Clone)]
pub struct ClinicStore {
    pub(crate) pool: DbPool,
    pub(crate) locks: Arc<KeyedLocks>,
    pub(crate) auth: AuthConfig,
}

impl ClinicStore {
    /// Opens (creating if needed) the database under `server.data_dir`,
    /// applies the schema and seeds first-run data.
    pub async fn open(config: &Config) -> Result<Self> {
        let data_dir = &config.server.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let db_path = data_dir.join("clinic.db");
        info!("Initializing database at {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        run_migrations(&pool).await?;

        let store = Self {
            pool,
            locks: Arc::new(KeyedLocks::new()),
            auth: config.auth.clone(),
        };

        seeders::seed_default_admin(&store.pool, &store.auth).await?;
        seeders::seed_default_settings(&store.pool, &store.auth).await?;

        info!("Database initialized successfully");
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub fn auth_config(&self) -> &AuthConfig {
        &self.auth
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    for collection in Collection::ALL {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(collection.as_str())
                .fetch_optional(pool)
                .await?;
        if existing.is_none() {
            sqlx::query(&collection.create_table_sql())
                .execute(pool)
                .await
                .with_context(|| format!("Failed to create table {}", collection))?;
            info!(table = collection.as_str(), "Created table");
        }

        // Indexes are additive, so they are (re)applied on every start
        for statement in collection.create_index_sql() {
            sqlx::query(&statement)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to create index on {}", collection))?;
        }
    }

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ClinicStore;
    use crate::config::Config;
    use tempfile::TempDir;

    /// Fresh store in a temporary directory; keep the `TempDir` alive for
    /// the duration of the test.
    pub async fn test_store() -> (ClinicStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_data_dir(dir.path());
        let store = ClinicStore::open(&config).await.unwrap();
        (store, dir)
    }
}
