//! Patient registration and lookup.

use chrono::Utc;

use crate::db::document::{from_document, to_document, ListQuery, RecordKey, SortOrder};
use crate::db::error::StoreResult;
use crate::db::models::{Actor, Patient};
use crate::db::schema::Collection;
use crate::db::ClinicStore;

/// Fields matched by the patient search box
pub const PATIENT_SEARCH_FIELDS: [&str; 4] = ["name", "phone", "email", "nationalId"];

impl ClinicStore {
    pub async fn add_patient(&self, mut patient: Patient, actor: Actor) -> StoreResult<Patient> {
        let now = Utc::now();
        patient.id = None;
        patient.created_at = now;
        patient.updated_at = now;
        patient.total_visits = 0;
        patient.last_visit = None;

        let stored = self
            .add(Collection::Patients, to_document(&patient)?, actor)
            .await?;
        from_document(stored)
    }

    pub async fn update_patient(&self, id: i64, mut patient: Patient, actor: Actor) -> StoreResult<Patient> {
        patient.id = Some(id);
        patient.updated_at = Utc::now();
        let stored = self
            .update(Collection::Patients, &RecordKey::Int(id), to_document(&patient)?, actor)
            .await?;
        from_document(stored)
    }

    pub async fn search_patients(&self, query: &str) -> StoreResult<Vec<Patient>> {
        let fields: Vec<String> = PATIENT_SEARCH_FIELDS.iter().map(|f| f.to_string()).collect();
        self.search(Collection::Patients, query, &fields)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Active patients, most recent visit first
    pub async fn active_patients(&self) -> StoreResult<Vec<Patient>> {
        self.get_all_as(
            Collection::Patients,
            &ListQuery::new()
                .filter("isActive", true)
                .sort_by("lastVisit", SortOrder::Desc),
        )
        .await
    }
}
