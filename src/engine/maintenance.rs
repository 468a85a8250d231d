//! Background maintenance
//!
//! Periodic housekeeping on independent timers:
//! - Sweeps expired sessions and releases idle lock slots
//! - Creates automatic backups while the `autoBackup` setting is on
//! - Raises appointment reminders, low-stock and overdue-invoice alerts
//!
//! Every step is idempotent, so a missed or repeated tick is harmless.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clinic::settings::bool_setting;
use crate::config::MaintenanceConfig;
use crate::db::models::{Actor, BackupSummary, BackupType};
use crate::db::{ClinicStore, StoreResult};

/// Result of one session sweep
#[derive(Debug, Default)]
pub struct SweepStats {
    pub sessions_removed: u64,
    pub locks_released: usize,
}

/// Result of one scan cycle
#[derive(Debug, Default)]
pub struct ScanStats {
    pub reminders: usize,
    pub low_stock_alerts: usize,
    pub overdue_invoices: usize,
}

pub struct Maintenance {
    store: ClinicStore,
}

impl Maintenance {
    pub fn new(store: ClinicStore) -> Self {
        Self { store }
    }

    pub async fn sweep(&self) -> StoreResult<SweepStats> {
        let stats = SweepStats {
            sessions_removed: self.store.sweep_expired_sessions().await?,
            locks_released: self.store.locks().prune(),
        };
        tracing::debug!(
            sessions = stats.sessions_removed,
            locks = stats.locks_released,
            "Session sweep completed"
        );
        Ok(stats)
    }

    /// Automatic backup, skipped while the `autoBackup` setting is off
    pub async fn auto_backup(&self) -> StoreResult<Option<BackupSummary>> {
        let enabled = {
            let mut conn = self.store.pool().acquire().await?;
            bool_setting(&mut *conn, "autoBackup", true).await?
        };
        if !enabled {
            tracing::debug!("Automatic backups are disabled, skipping");
            return Ok(None);
        }
        self.store
            .create_backup(BackupType::Automatic, Actor::System)
            .await
            .map(Some)
    }

    /// Runs every scan, logging and skipping the ones that fail
    pub async fn scan(&self) -> ScanStats {
        let now = Utc::now();
        let mut stats = ScanStats::default();

        match self.store.scan_appointment_reminders(now).await {
            Ok(count) => stats.reminders = count,
            Err(e) => tracing::warn!(error = %e, "Reminder scan failed"),
        }
        match self.store.scan_low_stock().await {
            Ok(count) => stats.low_stock_alerts = count,
            Err(e) => tracing::warn!(error = %e, "Low-stock scan failed"),
        }
        match self.store.flag_overdue_invoices(now).await {
            Ok(count) => stats.overdue_invoices = count,
            Err(e) => tracing::warn!(error = %e, "Overdue invoice scan failed"),
        }

        tracing::debug!(
            reminders = stats.reminders,
            low_stock = stats.low_stock_alerts,
            overdue = stats.overdue_invoices,
            "Scan cycle completed"
        );
        stats
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    every: Duration,
    cancel: CancellationToken,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => step().await,
            }
        }
        tracing::debug!(task = name, "Maintenance task stopped");
    })
}

/// Spawn the maintenance loops. They stop when `cancel` fires.
pub fn spawn_maintenance_tasks(
    store: ClinicStore,
    config: &MaintenanceConfig,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("Maintenance tasks are disabled");
        return Vec::new();
    }

    tracing::info!(
        sweep_secs = config.session_sweep_interval_seconds,
        backup_secs = config.backup_interval_seconds,
        scan_secs = config.reminder_interval_seconds,
        "Starting maintenance tasks"
    );

    let maintenance = Arc::new(Maintenance::new(store));
    let mut handles = Vec::with_capacity(3);

    let m = maintenance.clone();
    handles.push(spawn_loop(
        "session_sweep",
        Duration::from_secs(config.session_sweep_interval_seconds.max(1)),
        cancel.clone(),
        move || {
            let m = m.clone();
            async move {
                if let Err(e) = m.sweep().await {
                    tracing::error!(error = %e, "Session sweep failed");
                }
            }
        },
    ));

    let m = maintenance.clone();
    handles.push(spawn_loop(
        "auto_backup",
        Duration::from_secs(config.backup_interval_seconds.max(1)),
        cancel.clone(),
        move || {
            let m = m.clone();
            async move {
                if let Err(e) = m.auto_backup().await {
                    tracing::error!(error = %e, "Automatic backup failed");
                }
            }
        },
    ));

    let m = maintenance;
    handles.push(spawn_loop(
        "scans",
        Duration::from_secs(config.reminder_interval_seconds.max(1)),
        cancel,
        move || {
            let m = m.clone();
            async move {
                m.scan().await;
            }
        },
    ));

    handles
}
