//! Appointment booking with overlap detection.
//!
//! Bookings hold the doctor's and the patient's lock keys from the conflict
//! check until the insert commits, so two concurrent requests for the same
//! slot cannot both succeed.

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde_json::Value;
use sqlx::SqliteConnection;

use super::settings::{bool_setting, number_setting, text_setting};
use crate::db::document::{from_document, to_document, ListQuery, RecordKey};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{
    close_spacing_stats, find_overlap, kinds, Actor, Appointment, AppointmentConflict,
    AppointmentRequest, AppointmentStatus, ConflictParty, ConflictStats, Notification, Patient, User,
    DEFAULT_DURATION_MINUTES, MAX_DURATION_MINUTES,
};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

fn doctor_lock(doctor_id: i64) -> String {
    format!("doctor:{}", doctor_id)
}

fn patient_lock(patient_id: i64) -> String {
    format!("patient:{}", patient_id)
}

async fn appointments_where(
    conn: &mut SqliteConnection,
    index: &str,
    id: i64,
) -> StoreResult<Vec<Appointment>> {
    let def = Collection::Appointments
        .index(index)
        .ok_or_else(|| StoreError::validation(format!("Unknown appointment index '{}'", index)))?;
    store::fetch_by_index(conn, Collection::Appointments, def, &Value::from(id))
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

fn describe(party: ConflictParty, existing: &Appointment) -> String {
    let who = match party {
        ConflictParty::Doctor => "Doctor",
        ConflictParty::Patient => "Patient",
    };
    format!(
        "{} already has an appointment from {} to {}",
        who,
        existing.date.format("%Y-%m-%d %H:%M"),
        existing.end().format("%H:%M")
    )
}

/// First overlap for the requested slot: the doctor's calendar is checked
/// before the patient's. `exclude` skips the appointment being re-checked.
pub(crate) async fn find_conflict(
    conn: &mut SqliteConnection,
    request: &AppointmentRequest,
    exclude: Option<i64>,
) -> StoreResult<Option<AppointmentConflict>> {
    let start = request.date;
    let end = request.end();

    for (party, index, id) in [
        (ConflictParty::Doctor, "doctorId", request.doctor_id),
        (ConflictParty::Patient, "patientId", request.patient_id),
    ] {
        let mut existing = appointments_where(&mut *conn, index, id).await?;
        existing.retain(|a| exclude.is_none() || a.id != exclude);
        if let Some(hit) = find_overlap(&existing, start, end) {
            return Ok(Some(AppointmentConflict {
                party,
                conflicting_appointment_id: hit.id,
                reason: describe(party, hit),
            }));
        }
    }
    Ok(None)
}

/// Fills a missing duration from `defaultAppointmentDuration` and rejects
/// slots outside the bookable range
async fn resolve_request(
    conn: &mut SqliteConnection,
    request: &AppointmentRequest,
) -> StoreResult<AppointmentRequest> {
    let mut request = request.clone();
    if request.duration.is_none() {
        let minutes = number_setting(
            &mut *conn,
            "defaultAppointmentDuration",
            DEFAULT_DURATION_MINUTES as f64,
        )
        .await?;
        request.duration = Some((minutes as i64).clamp(1, MAX_DURATION_MINUTES));
    }
    request.validate().map_err(StoreError::validation)?;
    Ok(request)
}

fn appointment_number(prefix: &str, date: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random_range(0..10_000);
    format!("{}{}-{:04}", prefix, date.format("%Y%m%d"), suffix)
}

impl ClinicStore {
    /// Reports the first overlap a booking would hit, without booking
    pub async fn check_appointment_conflict(
        &self,
        request: &AppointmentRequest,
    ) -> StoreResult<Option<AppointmentConflict>> {
        let mut conn = self.pool.acquire().await?;
        let request = resolve_request(&mut *conn, request).await?;
        find_conflict(&mut *conn, &request, None).await
    }

    /// Books an appointment.
    ///
    /// Fails with `Conflict` when the doctor or the patient is already booked
    /// for an overlapping slot. On success the patient's visit counters are
    /// updated and, when `appointmentNotifications` is on, the doctor is
    /// notified.
    pub async fn add_appointment(
        &self,
        request: AppointmentRequest,
        actor: Actor,
    ) -> StoreResult<Appointment> {
        let _guards = self
            .locks
            .lock_all(&[doctor_lock(request.doctor_id), patient_lock(request.patient_id)])
            .await;

        let mut tx = self.pool.begin().await?;
        let request = resolve_request(&mut *tx, &request).await?;

        let patient_key = RecordKey::Int(request.patient_id);
        let mut patient: Patient = store::fetch_as(&mut *tx, Collection::Patients, &patient_key)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Patient {} not found", request.patient_id)))?;
        let doctor: User = store::fetch_as(&mut *tx, Collection::Users, &RecordKey::Int(request.doctor_id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Doctor {} not found", request.doctor_id)))?;

        if let Some(conflict) = find_conflict(&mut *tx, &request, None).await? {
            tracing::info!(
                doctor_id = request.doctor_id,
                patient_id = request.patient_id,
                party = ?conflict.party,
                "Appointment rejected: slot taken"
            );
            return Err(StoreError::conflict(conflict.reason));
        }

        let prefix = text_setting(&mut *tx, "appointmentNumberPrefix", "APT-").await?;
        let appointment = Appointment {
            id: None,
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            date: request.date,
            duration: request.duration_minutes(),
            status: AppointmentStatus::Scheduled,
            appointment_type: request
                .appointment_type
                .clone()
                .unwrap_or_else(|| "consultation".to_string()),
            appointment_number: Some(appointment_number(&prefix, request.date)),
            notes: request.notes.clone(),
            created_at: Utc::now(),
        };
        let stored = store::add_record(
            &mut *tx,
            Collection::Appointments,
            to_document(&appointment)?,
            actor,
        )
        .await?;
        let appointment: Appointment = from_document(stored)?;
        let appointment_id = appointment.id.unwrap_or_default();

        patient.record_visit(appointment.date);
        store::update_record(
            &mut *tx,
            Collection::Patients,
            &patient_key,
            to_document(&patient)?,
            actor,
        )
        .await?;

        if bool_setting(&mut *tx, "appointmentNotifications", true).await? {
            let notification = Notification::new(
                request.doctor_id,
                kinds::NEW_APPOINTMENT,
                "New appointment",
                format!(
                    "{} booked for {} on {}",
                    patient.name,
                    if doctor.full_name.is_empty() { &doctor.username } else { &doctor.full_name },
                    appointment.date.format("%Y-%m-%d %H:%M")
                ),
            )
            .related_to(appointment_id)
            .scheduled_for(appointment.date);
            store::add_record(
                &mut *tx,
                Collection::Notifications,
                to_document(&notification)?,
                actor,
            )
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            appointment_id = appointment_id,
            doctor_id = appointment.doctor_id,
            patient_id = appointment.patient_id,
            "Appointment booked"
        );
        Ok(appointment)
    }

    /// Dashboard heuristic: same-doctor appointments starting less than 30
    /// minutes apart. Display metric only; booking uses the exact check.
    pub async fn appointment_conflict_stats(&self) -> StoreResult<ConflictStats> {
        let appointments: Vec<Appointment> = self
            .get_all_as(Collection::Appointments, &ListQuery::new())
            .await?;
        Ok(close_spacing_stats(&appointments))
    }

    /// Moves an appointment to a new status. Re-activating a cancelled
    /// appointment re-runs the overlap check.
    pub async fn update_appointment_status(
        &self,
        id: i64,
        status: AppointmentStatus,
        actor: Actor,
    ) -> StoreResult<Appointment> {
        let key = RecordKey::Int(id);
        let current: Appointment = self
            .get_as(Collection::Appointments, &key)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Appointment {} not found", id)))?;

        let _guards = self
            .locks
            .lock_all(&[doctor_lock(current.doctor_id), patient_lock(current.patient_id)])
            .await;

        let mut tx = self.pool.begin().await?;
        let mut appointment: Appointment =
            store::require_as(&mut *tx, Collection::Appointments, &key).await?;

        if !appointment.status.occupies_slot() && status.occupies_slot() {
            let request = AppointmentRequest {
                doctor_id: appointment.doctor_id,
                patient_id: appointment.patient_id,
                date: appointment.date,
                duration: Some(appointment.duration),
                appointment_type: None,
                notes: None,
            };
            if let Some(conflict) = find_conflict(&mut *tx, &request, Some(id)).await? {
                return Err(StoreError::conflict(conflict.reason));
            }
        }

        appointment.status = status;
        store::update_record(
            &mut *tx,
            Collection::Appointments,
            &key,
            to_document(&appointment)?,
            actor,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(appointment_id = id, status = status.as_str(), "Appointment status changed");
        Ok(appointment)
    }

    /// Appointments starting on `day` (UTC), optionally for one doctor,
    /// in start order
    pub async fn appointments_for_day(
        &self,
        day: NaiveDate,
        doctor_id: Option<i64>,
    ) -> StoreResult<Vec<Appointment>> {
        let mut query = ListQuery::new().sort_by("date", crate::db::SortOrder::Asc);
        if let Some(doctor_id) = doctor_id {
            query = query.filter("doctorId", doctor_id);
        }
        let appointments: Vec<Appointment> = self.get_all_as(Collection::Appointments, &query).await?;
        Ok(appointments
            .into_iter()
            .filter(|a| a.date.date_naive() == day)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewUser, Role};
    use crate::db::test_support::test_store;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, day, hour, minute, 0).unwrap()
    }

    fn request(doctor_id: i64, patient_id: i64, date: DateTime<Utc>, duration: i64) -> AppointmentRequest {
        AppointmentRequest {
            doctor_id,
            patient_id,
            date,
            duration: Some(duration),
            appointment_type: None,
            notes: None,
        }
    }

    async fn doctor(store: &ClinicStore, username: &str) -> i64 {
        store
            .create_user(
                NewUser {
                    username: username.to_string(),
                    password: "Doctor2024x".to_string(),
                    email: format!("{}@clinic.local", username),
                    role: Role::Doctor,
                    full_name: format!("Dr {}", username),
                },
                Actor::System,
            )
            .await
            .unwrap()
            .id
    }

    async fn patient(store: &ClinicStore, name: &str) -> i64 {
        store
            .add_patient(Patient::new(name), Actor::System)
            .await
            .unwrap()
            .id
            .unwrap()
    }

    #[tokio::test]
    async fn test_doctor_double_booking_rejected() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "osei").await;
        let p1 = patient(&store, "P1").await;
        let p2 = patient(&store, "P2").await;

        store
            .add_appointment(request(doc, p1, at(4, 10, 0), 30), Actor::User(1))
            .await
            .unwrap();

        let err = store
            .add_appointment(request(doc, p2, at(4, 10, 15), 30), Actor::User(1))
            .await
            .unwrap_err();
        match err {
            StoreError::Conflict(reason) => assert!(reason.contains("Doctor")),
            other => panic!("unexpected error: {other:?}"),
        }

        // back-to-back is fine
        store
            .add_appointment(request(doc, p2, at(4, 10, 30), 30), Actor::User(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_patient_overlap_checked_after_doctor() {
        let (store, _dir) = test_store().await;
        let d1 = doctor(&store, "d1").await;
        let d2 = doctor(&store, "d2").await;
        let p = patient(&store, "Busy Patient").await;

        store
            .add_appointment(request(d1, p, at(5, 9, 0), 60), Actor::User(1))
            .await
            .unwrap();

        let conflict = store
            .check_appointment_conflict(&request(d2, p, at(5, 9, 30), 30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conflict.party, ConflictParty::Patient);
        assert!(conflict.reason.contains("Patient"));
    }

    #[tokio::test]
    async fn test_cancelled_appointments_free_the_slot() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "mensa").await;
        let p1 = patient(&store, "P1").await;
        let p2 = patient(&store, "P2").await;

        let first = store
            .add_appointment(request(doc, p1, at(6, 14, 0), 30), Actor::User(1))
            .await
            .unwrap();
        let first_id = first.id.unwrap();
        store
            .update_appointment_status(first_id, AppointmentStatus::Cancelled, Actor::User(1))
            .await
            .unwrap();

        store
            .add_appointment(request(doc, p2, at(6, 14, 0), 30), Actor::User(1))
            .await
            .unwrap();

        // the cancelled one can no longer be reinstated into the taken slot
        let err = store
            .update_appointment_status(first_id, AppointmentStatus::Scheduled, Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_booking_updates_patient_and_notifies_doctor() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "adjei").await;
        let p = patient(&store, "Visitor").await;

        let appt = store
            .add_appointment(
                AppointmentRequest {
                    duration: None,
                    ..request(doc, p, at(7, 8, 0), 30)
                },
                Actor::User(1),
            )
            .await
            .unwrap();
        assert_eq!(appt.duration, 30);
        assert!(appt.appointment_number.as_deref().unwrap().starts_with("APT-20300307-"));

        let patient: Patient = store
            .get_as(Collection::Patients, &RecordKey::Int(p))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patient.total_visits, 1);
        assert_eq!(patient.last_visit, Some(at(7, 8, 0)));

        let unread = store.unread_notifications(doc).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].kind, kinds::NEW_APPOINTMENT);
        assert_eq!(unread[0].related_id, appt.id);
    }

    #[tokio::test]
    async fn test_default_duration_follows_setting() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "owusu").await;
        let p = patient(&store, "Long Visit").await;
        store
            .update_setting("defaultAppointmentDuration", serde_json::json!(45), Actor::System)
            .await
            .unwrap();

        let appt = store
            .add_appointment(
                AppointmentRequest {
                    duration: None,
                    ..request(doc, p, at(11, 9, 0), 30)
                },
                Actor::User(1),
            )
            .await
            .unwrap();
        assert_eq!(appt.duration, 45);
    }

    #[tokio::test]
    async fn test_out_of_range_durations_are_validation_errors() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "quaye").await;
        let p = patient(&store, "Edge Case").await;

        for duration in [0, -600, 200_000_000_000] {
            let err = store
                .add_appointment(request(doc, p, at(12, 9, 0), duration), Actor::User(1))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)), "duration {duration}");

            let err = store
                .check_appointment_conflict(&request(doc, p, at(12, 9, 0), duration))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }
        assert!(store
            .appointments_for_day(NaiveDate::from_ymd_opt(2030, 3, 12).unwrap(), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_booking_requires_existing_patient() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "boateng").await;
        let err = store
            .add_appointment(request(doc, 999, at(8, 8, 0), 30), Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_bookings_never_overlap() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "rush").await;
        let mut patients = Vec::new();
        for i in 0..6 {
            patients.push(patient(&store, &format!("P{}", i)).await);
        }

        let mut handles = Vec::new();
        for (i, p) in patients.into_iter().enumerate() {
            let store = store.clone();
            let start = at(9, 9, (i as u32 % 2) * 10);
            handles.push(tokio::spawn(async move {
                store.add_appointment(request(doc, p, start, 30), Actor::User(1)).await
            }));
        }

        let mut booked = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                booked += 1;
            }
        }
        assert_eq!(booked, 1);

        let day = store
            .appointments_for_day(NaiveDate::from_ymd_opt(2030, 3, 9).unwrap(), Some(doc))
            .await
            .unwrap();
        assert_eq!(day.len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_stats_heuristic() {
        let (store, _dir) = test_store().await;
        let doc = doctor(&store, "stats").await;
        let p1 = patient(&store, "A").await;
        let p2 = patient(&store, "B").await;
        store
            .add_appointment(request(doc, p1, at(10, 9, 0), 15), Actor::User(1))
            .await
            .unwrap();
        store
            .add_appointment(request(doc, p2, at(10, 9, 20), 15), Actor::User(1))
            .await
            .unwrap();

        let stats = store.appointment_conflict_stats().await.unwrap();
        assert_eq!(stats.appointments_checked, 2);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.doctors_affected, vec![doc]);
    }
}
