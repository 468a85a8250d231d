//! Typed domain models, one module per area of the clinic.
//!
//! Records are stored as JSON documents; these types define the shape each
//! collection's documents must have.

pub mod appointment;
pub mod audit;
pub mod backup;
pub mod invoice;
pub mod medical_record;
pub mod notification;
pub mod patient;
pub mod prescription;
pub mod setting;
pub mod user;

pub use appointment::*;
pub use audit::*;
pub use backup::*;
pub use invoice::*;
pub use medical_record::*;
pub use notification::*;
pub use patient::*;
pub use prescription::*;
pub use setting::*;
pub use user::*;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::document::Document;
use super::error::{StoreError, StoreResult};
use super::schema::Collection;

/// `start + minutes`, or `None` when the result is not representable
pub fn checked_add_minutes(start: DateTime<Utc>, minutes: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_minutes(minutes).and_then(|delta| start.checked_add_signed(delta))
}

/// `start + days` for a day count read from a number setting
pub fn checked_add_days(start: DateTime<Utc>, days: f64) -> StoreResult<DateTime<Utc>> {
    if !days.is_finite() {
        return Err(StoreError::validation(format!("Invalid day count: {}", days)));
    }
    TimeDelta::try_days(days as i64)
        .and_then(|delta| start.checked_add_signed(delta))
        .ok_or_else(|| StoreError::validation(format!("{} days from {} is out of range", days, start)))
}

fn parse<T: DeserializeOwned>(collection: Collection, doc: &Document) -> StoreResult<T> {
    serde_json::from_value::<T>(Value::Object(doc.clone()))
        .map_err(|e| StoreError::validation(format!("Invalid {} record: {}", collection, e)))
}

fn check<T: DeserializeOwned>(collection: Collection, doc: &Document) -> StoreResult<()> {
    parse::<T>(collection, doc).map(|_| ())
}

/// Checks that `doc` has the shape of the collection's model, so typed reads
/// of anything the store accepted always succeed.
pub fn validate_shape(collection: Collection, doc: &Document) -> StoreResult<()> {
    match collection {
        Collection::Users => check::<User>(collection, doc),
        Collection::Sessions => check::<Session>(collection, doc),
        Collection::Patients => check::<Patient>(collection, doc),
        Collection::Appointments => parse::<Appointment>(collection, doc)?
            .validate()
            .map_err(|e| StoreError::validation(format!("Invalid {} record: {}", collection, e))),
        Collection::MedicalRecords => check::<MedicalRecord>(collection, doc),
        Collection::Prescriptions => check::<Prescription>(collection, doc),
        Collection::PrescriptionItems => check::<PrescriptionItem>(collection, doc),
        Collection::Medications => check::<Medication>(collection, doc),
        Collection::Services => check::<Service>(collection, doc),
        Collection::Invoices => check::<Invoice>(collection, doc),
        Collection::InvoiceItems => check::<InvoiceItem>(collection, doc),
        Collection::Notifications => check::<Notification>(collection, doc),
        Collection::AuditLogs => check::<AuditLog>(collection, doc),
        Collection::Settings => check::<Setting>(collection, doc),
        Collection::Backups => check::<Backup>(collection, doc),
    }
}
