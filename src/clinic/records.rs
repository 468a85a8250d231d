//! Medical records.

use crate::db::document::{from_document, to_document, ListQuery, RecordKey, SortOrder};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{Actor, MedicalRecord, Patient};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

impl ClinicStore {
    /// Files a medical record for an existing patient. At most one record
    /// may reference a given appointment.
    pub async fn add_medical_record(
        &self,
        mut record: MedicalRecord,
        actor: Actor,
    ) -> StoreResult<MedicalRecord> {
        record.id = None;

        let mut tx = self.pool.begin().await?;
        store::fetch_as::<Patient>(&mut *tx, Collection::Patients, &RecordKey::Int(record.patient_id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Patient {} not found", record.patient_id)))?;

        let stored = store::add_record(
            &mut *tx,
            Collection::MedicalRecords,
            to_document(&record)?,
            actor,
        )
        .await?;
        tx.commit().await?;

        let record: MedicalRecord = from_document(stored)?;
        tracing::info!(
            record_id = ?record.id,
            patient_id = record.patient_id,
            "Medical record filed"
        );
        Ok(record)
    }

    /// A patient's records, newest first
    pub async fn patient_history(&self, patient_id: i64) -> StoreResult<Vec<MedicalRecord>> {
        self.get_all_as(
            Collection::MedicalRecords,
            &ListQuery::new()
                .filter("patientId", patient_id)
                .sort_by("date", SortOrder::Desc),
        )
        .await
    }
}
