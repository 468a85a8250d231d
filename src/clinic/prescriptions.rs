//! Prescriptions, their line items and refills.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqliteConnection;

use super::settings::number_setting;
use crate::db::document::{from_document, to_document, RecordKey};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{
    checked_add_days, Actor, Medication, Patient, Prescription, PrescriptionItem, PrescriptionStatus,
    PrescriptionWithItems,
};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

const DEFAULT_VALIDITY_DAYS: f64 = 30.0;

async fn items_of(conn: &mut SqliteConnection, prescription_id: i64) -> StoreResult<Vec<PrescriptionItem>> {
    let def = Collection::PrescriptionItems
        .index("prescriptionId")
        .ok_or_else(|| StoreError::validation("Unknown index 'prescriptionId'"))?;
    store::fetch_by_index(conn, Collection::PrescriptionItems, def, &Value::from(prescription_id))
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

/// Writes a prescription header and its items inside the caller's transaction
async fn write_prescription(
    conn: &mut SqliteConnection,
    prescription: &Prescription,
    items: Vec<PrescriptionItem>,
    actor: Actor,
) -> StoreResult<PrescriptionWithItems> {
    let stored = store::add_record(
        &mut *conn,
        Collection::Prescriptions,
        to_document(prescription)?,
        actor,
    )
    .await?;
    let prescription: Prescription = from_document(stored)?;
    let prescription_id = prescription.id.unwrap_or_default();

    let mut written = Vec::with_capacity(items.len());
    for mut item in items {
        item.id = None;
        item.prescription_id = prescription_id;
        let stored = store::add_record(
            &mut *conn,
            Collection::PrescriptionItems,
            to_document(&item)?,
            actor,
        )
        .await?;
        written.push(from_document(stored)?);
    }

    Ok(PrescriptionWithItems {
        prescription,
        items: written,
    })
}

impl ClinicStore {
    /// Issues a prescription with at least one item. Every item must name an
    /// existing medication. Without an explicit expiry the prescription is
    /// valid for `defaultPrescriptionValidityDays`.
    pub async fn create_prescription(
        &self,
        mut prescription: Prescription,
        items: Vec<PrescriptionItem>,
        actor: Actor,
    ) -> StoreResult<PrescriptionWithItems> {
        if items.is_empty() {
            return Err(StoreError::validation("A prescription needs at least one item"));
        }
        if items.iter().any(|item| item.quantity <= 0) {
            return Err(StoreError::validation("Item quantities must be positive"));
        }

        let mut tx = self.pool.begin().await?;

        store::fetch_as::<Patient>(&mut *tx, Collection::Patients, &RecordKey::Int(prescription.patient_id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Patient {} not found", prescription.patient_id)))?;
        for item in &items {
            store::fetch_as::<Medication>(&mut *tx, Collection::Medications, &RecordKey::Int(item.medication_id))
                .await?
                .ok_or_else(|| StoreError::not_found(format!("Medication {} not found", item.medication_id)))?;
        }

        let now = Utc::now();
        prescription.id = None;
        prescription.date = now;
        prescription.parent_prescription_id = None;
        if prescription.expiry_date.is_none() {
            let days = number_setting(&mut *tx, "defaultPrescriptionValidityDays", DEFAULT_VALIDITY_DAYS).await?;
            prescription.expiry_date = Some(checked_add_days(now, days)?);
        }

        let created = write_prescription(&mut *tx, &prescription, items, actor).await?;
        tx.commit().await?;

        tracing::info!(
            prescription_id = ?created.prescription.id,
            patient_id = created.prescription.patient_id,
            items = created.items.len(),
            "Prescription issued"
        );
        Ok(created)
    }

    pub async fn prescription_with_items(&self, id: i64) -> StoreResult<Option<PrescriptionWithItems>> {
        let mut conn = self.pool.acquire().await?;
        let prescription: Option<Prescription> =
            store::fetch_as(&mut *conn, Collection::Prescriptions, &RecordKey::Int(id)).await?;
        match prescription {
            Some(prescription) => {
                let items = items_of(&mut *conn, id).await?;
                Ok(Some(PrescriptionWithItems { prescription, items }))
            }
            None => Ok(None),
        }
    }

    /// Issues a refill of prescription `id`.
    ///
    /// The refill is a new prescription of type "refill" pointing at its
    /// parent, carrying copies of the parent's items and no refills of its
    /// own. The parent's remaining refills drop by one. Refused with
    /// `Conflict` when no refills remain, the parent has expired or was
    /// cancelled.
    pub async fn refill_prescription(&self, id: i64, actor: Actor) -> StoreResult<PrescriptionWithItems> {
        let _guard = self.locks.lock(&format!("prescription:{}", id)).await;

        let key = RecordKey::Int(id);
        let mut tx = self.pool.begin().await?;
        let mut parent: Prescription = store::require_as(&mut *tx, Collection::Prescriptions, &key).await?;

        let now = Utc::now();
        if let Some(reason) = parent.refill_blocker(now) {
            tracing::info!(prescription_id = id, reason = %reason, "Refill refused");
            return Err(StoreError::conflict(reason));
        }

        let days = number_setting(&mut *tx, "defaultPrescriptionValidityDays", DEFAULT_VALIDITY_DAYS).await?;
        let refill = Prescription {
            id: None,
            patient_id: parent.patient_id,
            doctor_id: parent.doctor_id,
            medical_record_id: parent.medical_record_id,
            date: now,
            status: PrescriptionStatus::Active,
            prescription_type: "refill".to_string(),
            expiry_date: Some(checked_add_days(now, days)?),
            refills_remaining: 0,
            parent_prescription_id: Some(id),
            notes: parent.notes.clone(),
        };
        let items = items_of(&mut *tx, id).await?;
        let created = write_prescription(&mut *tx, &refill, items, actor).await?;

        parent.refills_remaining -= 1;
        store::update_record(
            &mut *tx,
            Collection::Prescriptions,
            &key,
            to_document(&parent)?,
            actor,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            prescription_id = id,
            refill_id = ?created.prescription.id,
            refills_remaining = parent.refills_remaining,
            "Prescription refilled"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::db::test_support::test_store;
    use serde_json::json;

    async fn fixtures(store: &ClinicStore) -> (i64, i64) {
        let patient = store
            .add_patient(Patient::new("Ama"), Actor::User(1))
            .await
            .unwrap()
            .id
            .unwrap();
        let medication = store
            .add(
                Collection::Medications,
                to_document(&json!({"name": "Amoxicillin", "stockQuantity": 50})).unwrap(),
                Actor::User(1),
            )
            .await
            .unwrap()["id"]
            .as_i64()
            .unwrap();
        (patient, medication)
    }

    fn header(patient_id: i64, refills: i64) -> Prescription {
        serde_json::from_value(json!({
            "patientId": patient_id,
            "doctorId": 1,
            "refillsRemaining": refills,
        }))
        .unwrap()
    }

    fn item(medication_id: i64) -> PrescriptionItem {
        serde_json::from_value(json!({
            "medicationId": medication_id,
            "dosage": "500mg",
            "frequency": "3x daily",
            "quantity": 21,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_items_and_known_medications() {
        let (store, _dir) = test_store().await;
        let (patient, medication) = fixtures(&store).await;

        let err = store
            .create_prescription(header(patient, 0), vec![], Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = store
            .create_prescription(header(patient, 0), vec![item(medication + 100)], Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.count(Collection::Prescriptions).await.unwrap(), 0);

        let created = store
            .create_prescription(header(patient, 0), vec![item(medication)], Actor::User(1))
            .await
            .unwrap();
        let expiry = created.prescription.expiry_date.unwrap();
        assert!(expiry > Utc::now() + Duration::days(29));
        assert_eq!(created.items.len(), 1);
        assert_eq!(Some(created.items[0].prescription_id), created.prescription.id);
    }

    #[tokio::test]
    async fn test_refill_creates_child_and_decrements_parent() {
        let (store, _dir) = test_store().await;
        let (patient, medication) = fixtures(&store).await;
        let parent = store
            .create_prescription(header(patient, 1), vec![item(medication)], Actor::User(1))
            .await
            .unwrap();
        let parent_id = parent.prescription.id.unwrap();

        let refill = store.refill_prescription(parent_id, Actor::User(1)).await.unwrap();
        assert_eq!(refill.prescription.prescription_type, "refill");
        assert_eq!(refill.prescription.parent_prescription_id, Some(parent_id));
        assert_eq!(refill.prescription.refills_remaining, 0);
        assert_eq!(refill.items.len(), 1);
        assert_eq!(refill.items[0].dosage.as_deref(), Some("500mg"));

        let reloaded = store.prescription_with_items(parent_id).await.unwrap().unwrap();
        assert_eq!(reloaded.prescription.refills_remaining, 0);

        let err = store.refill_prescription(parent_id, Actor::User(1)).await.unwrap_err();
        match err {
            StoreError::Conflict(reason) => assert!(reason.contains("No refills remaining")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.count(Collection::Prescriptions).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_expired_prescription_cannot_be_refilled() {
        let (store, _dir) = test_store().await;
        let (patient, medication) = fixtures(&store).await;
        let mut expired = header(patient, 3);
        expired.expiry_date = Some(Utc::now() - Duration::days(1));
        let created = store
            .create_prescription(expired, vec![item(medication)], Actor::User(1))
            .await
            .unwrap();

        let err = store
            .refill_prescription(created.prescription.id.unwrap(), Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(ref r) if r.contains("expired")));
        assert_eq!(store.count(Collection::Prescriptions).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refills_respect_count() {
        let (store, _dir) = test_store().await;
        let (patient, medication) = fixtures(&store).await;
        let parent = store
            .create_prescription(header(patient, 2), vec![item(medication)], Actor::User(1))
            .await
            .unwrap();
        let parent_id = parent.prescription.id.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.refill_prescription(parent_id, Actor::User(1)).await
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 2);
    }
}
