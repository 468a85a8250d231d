//! Clinic operations layered on the generic document store.
//!
//! Each module adds `ClinicStore` methods for one area. Multi-record
//! operations run in a single transaction and go through the audited
//! primitives in `db::store`.

pub mod backup;
pub mod billing;
pub mod notifications;
pub mod patients;
pub mod prescriptions;
pub mod records;
pub mod scheduling;
pub mod settings;

pub use patients::PATIENT_SEARCH_FIELDS;
