//! In-app notifications and the scans that raise them.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqliteConnection;

use super::settings::{bool_setting, number_setting};
use crate::db::document::{from_document, to_document, ListQuery, RecordKey, SortOrder};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{
    checked_add_minutes, kinds, Actor, Appointment, Medication, Notification, NotificationPriority, Patient, User,
};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

const DEFAULT_REMINDER_HOURS: f64 = 24.0;

/// Whether a notification of `kind` about `related_id` already exists,
/// optionally restricted to one recipient
pub(crate) async fn notification_exists(
    conn: &mut SqliteConnection,
    kind: &str,
    related_id: i64,
    user_id: Option<i64>,
    unread_only: bool,
) -> StoreResult<bool> {
    let def = Collection::Notifications
        .index("relatedId")
        .ok_or_else(|| StoreError::validation("Unknown index 'relatedId'"))?;
    let existing: Vec<Notification> =
        store::fetch_by_index(conn, Collection::Notifications, def, &Value::from(related_id))
            .await?
            .into_iter()
            .map(from_document)
            .collect::<StoreResult<_>>()?;
    Ok(existing.iter().any(|n| {
        n.kind == kind
            && user_id.map(|id| id == n.user_id).unwrap_or(true)
            && !(unread_only && n.is_read)
    }))
}

pub(crate) async fn active_admins(conn: &mut SqliteConnection) -> StoreResult<Vec<User>> {
    let def = Collection::Users
        .index("role")
        .ok_or_else(|| StoreError::validation("Unknown index 'role'"))?;
    let admins = store::fetch_by_index(conn, Collection::Users, def, &Value::from("admin"))
        .await?
        .into_iter()
        .map(from_document::<User>)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(admins.into_iter().filter(|u| u.is_active).collect())
}

pub(crate) async fn insert_notification(
    conn: &mut SqliteConnection,
    notification: &Notification,
    actor: Actor,
) -> StoreResult<Notification> {
    let stored = store::add_record(
        conn,
        Collection::Notifications,
        to_document(notification)?,
        actor,
    )
    .await?;
    from_document(stored)
}

impl ClinicStore {
    pub async fn notify(&self, mut notification: Notification, actor: Actor) -> StoreResult<Notification> {
        notification.id = None;
        let mut tx = self.pool.begin().await?;
        store::fetch_as::<User>(&mut *tx, Collection::Users, &RecordKey::Int(notification.user_id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("User {} not found", notification.user_id)))?;
        let created = insert_notification(&mut *tx, &notification, actor).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Unread notifications for a user, newest first
    pub async fn unread_notifications(&self, user_id: i64) -> StoreResult<Vec<Notification>> {
        self.get_all_as(
            Collection::Notifications,
            &ListQuery::new()
                .filter("userId", user_id)
                .filter("isRead", false)
                .sort_by("createdAt", SortOrder::Desc),
        )
        .await
    }

    pub async fn mark_notification_read(&self, id: i64, actor: Actor) -> StoreResult<Notification> {
        let key = RecordKey::Int(id);
        let mut tx = self.pool.begin().await?;
        let mut notification: Notification =
            store::require_as(&mut *tx, Collection::Notifications, &key).await?;
        if !notification.is_read {
            notification.is_read = true;
            store::update_record(
                &mut *tx,
                Collection::Notifications,
                &key,
                to_document(&notification)?,
                actor,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(notification)
    }

    /// Raises one reminder per upcoming, non-cancelled appointment starting
    /// within `reminderHours` of `now`. Returns how many were created.
    pub async fn scan_appointment_reminders(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        if !bool_setting(&mut *tx, "appointmentReminders", true).await? {
            return Ok(0);
        }
        let hours = number_setting(&mut *tx, "reminderHours", DEFAULT_REMINDER_HOURS).await?;
        let horizon = checked_add_minutes(now, (hours * 60.0) as i64)
            .ok_or_else(|| StoreError::validation(format!("reminderHours {} is out of range", hours)))?;

        let appointments: Vec<Appointment> = store::fetch_all(&mut *tx, Collection::Appointments)
            .await?
            .into_iter()
            .map(from_document)
            .collect::<StoreResult<_>>()?;

        let mut created = 0;
        for appointment in appointments
            .iter()
            .filter(|a| a.status.occupies_slot() && a.date > now && a.date <= horizon)
        {
            let Some(appointment_id) = appointment.id else {
                continue;
            };
            if notification_exists(&mut *tx, kinds::APPOINTMENT_REMINDER, appointment_id, None, false).await? {
                continue;
            }

            let patient_name = store::fetch_as::<Patient>(
                &mut *tx,
                Collection::Patients,
                &RecordKey::Int(appointment.patient_id),
            )
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| format!("Patient {}", appointment.patient_id));

            let reminder = Notification::new(
                appointment.doctor_id,
                kinds::APPOINTMENT_REMINDER,
                "Upcoming appointment",
                format!(
                    "{} at {}",
                    patient_name,
                    appointment.date.format("%Y-%m-%d %H:%M")
                ),
            )
            .related_to(appointment_id)
            .scheduled_for(appointment.date);
            insert_notification(&mut *tx, &reminder, Actor::System).await?;
            created += 1;
        }
        tx.commit().await?;

        if created > 0 {
            tracing::info!(count = created, "Appointment reminders raised");
        }
        Ok(created)
    }

    /// Raises a low-stock alert for every admin and every active medication
    /// at or below its minimum level, unless an unread one is still pending.
    pub async fn scan_low_stock(&self) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        if !bool_setting(&mut *tx, "lowStockAlerts", true).await? {
            return Ok(0);
        }

        let medications: Vec<Medication> = store::fetch_all(&mut *tx, Collection::Medications)
            .await?
            .into_iter()
            .map(from_document)
            .collect::<StoreResult<_>>()?;
        let admins = active_admins(&mut *tx).await?;

        let mut created = 0;
        for medication in medications.iter().filter(|m| m.is_low_stock()) {
            let Some(medication_id) = medication.id else {
                continue;
            };
            for admin in &admins {
                let Some(admin_id) = admin.id else {
                    continue;
                };
                if notification_exists(&mut *tx, kinds::LOW_STOCK, medication_id, Some(admin_id), true).await? {
                    continue;
                }
                let alert = Notification::new(
                    admin_id,
                    kinds::LOW_STOCK,
                    "Low stock",
                    format!(
                        "{} is down to {} (minimum {})",
                        medication.name, medication.stock_quantity, medication.min_stock_level
                    ),
                )
                .with_priority(NotificationPriority::High)
                .related_to(medication_id);
                insert_notification(&mut *tx, &alert, Actor::System).await?;
                created += 1;
            }
        }
        tx.commit().await?;

        if created > 0 {
            tracing::info!(count = created, "Low-stock alerts raised");
        }
        Ok(created)
    }
}
