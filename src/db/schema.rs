//! Collection catalog: storage names, keys, secondary indexes and required
//! fields for every collection the store owns.

use serde::{Deserialize, Serialize};

/// A secondary index over one top-level document field.
///
/// Index names equal the field they cover, so `get_by_index(Users, "username", ..)`
/// resolves to `json_extract(data, '$.username')`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub field: &'static str,
    pub unique: bool,
}

const fn index(field: &'static str) -> IndexDef {
    IndexDef {
        name: field,
        field,
        unique: false,
    }
}

const fn unique(field: &'static str) -> IndexDef {
    IndexDef {
        name: field,
        field,
        unique: true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Users,
    Sessions,
    Patients,
    Appointments,
    MedicalRecords,
    Prescriptions,
    PrescriptionItems,
    Medications,
    Services,
    Invoices,
    InvoiceItems,
    Notifications,
    AuditLogs,
    Settings,
    Backups,
}

impl Collection {
    pub const ALL: [Collection; 15] = [
        Collection::Users,
        Collection::Sessions,
        Collection::Patients,
        Collection::Appointments,
        Collection::MedicalRecords,
        Collection::Prescriptions,
        Collection::PrescriptionItems,
        Collection::Medications,
        Collection::Services,
        Collection::Invoices,
        Collection::InvoiceItems,
        Collection::Notifications,
        Collection::AuditLogs,
        Collection::Settings,
        Collection::Backups,
    ];

    /// Storage (table) name
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Sessions => "sessions",
            Collection::Patients => "patients",
            Collection::Appointments => "appointments",
            Collection::MedicalRecords => "medical_records",
            Collection::Prescriptions => "prescriptions",
            Collection::PrescriptionItems => "prescription_items",
            Collection::Medications => "medications",
            Collection::Services => "services",
            Collection::Invoices => "invoices",
            Collection::InvoiceItems => "invoice_items",
            Collection::Notifications => "notifications",
            Collection::AuditLogs => "audit_logs",
            Collection::Settings => "settings",
            Collection::Backups => "backups",
        }
    }

    /// Accepts both the storage name and the camelCase name the dashboard uses.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().replace('_', "") == normalized)
    }

    /// Name of the primary-key field inside each document
    pub fn key_field(&self) -> &'static str {
        match self {
            Collection::Settings => "key",
            _ => "id",
        }
    }

    /// Whether the store assigns integer keys when the caller supplies none
    pub fn is_auto_increment(&self) -> bool {
        !matches!(self, Collection::Settings)
    }

    pub fn indexes(&self) -> &'static [IndexDef] {
        const USERS: &[IndexDef] = &[
            unique("username"),
            unique("email"),
            index("role"),
            index("isActive"),
        ];
        const SESSIONS: &[IndexDef] = &[unique("token"), index("userId"), index("expiry")];
        const PATIENTS: &[IndexDef] = &[
            unique("nationalId"),
            unique("email"),
            index("phone"),
            index("name"),
            index("isActive"),
        ];
        const APPOINTMENTS: &[IndexDef] = &[
            index("patientId"),
            index("doctorId"),
            index("date"),
            index("status"),
            index("appointmentNumber"),
        ];
        const MEDICAL_RECORDS: &[IndexDef] = &[
            index("patientId"),
            index("doctorId"),
            unique("appointmentId"),
            index("date"),
        ];
        const PRESCRIPTIONS: &[IndexDef] = &[
            index("patientId"),
            index("doctorId"),
            index("status"),
            index("parentPrescriptionId"),
        ];
        const PRESCRIPTION_ITEMS: &[IndexDef] = &[index("prescriptionId"), index("medicationId")];
        const MEDICATIONS: &[IndexDef] = &[index("name"), index("category")];
        const SERVICES: &[IndexDef] = &[index("name"), index("category")];
        const INVOICES: &[IndexDef] = &[
            unique("invoiceNumber"),
            index("patientId"),
            index("status"),
            index("date"),
        ];
        const INVOICE_ITEMS: &[IndexDef] = &[index("invoiceId"), index("serviceId")];
        const NOTIFICATIONS: &[IndexDef] = &[
            index("userId"),
            index("isRead"),
            index("type"),
            index("relatedId"),
        ];
        const AUDIT_LOGS: &[IndexDef] = &[
            index("userId"),
            index("action"),
            index("table"),
            index("timestamp"),
        ];
        const SETTINGS: &[IndexDef] = &[index("category")];
        const BACKUPS: &[IndexDef] = &[index("createdAt")];

        match self {
            Collection::Users => USERS,
            Collection::Sessions => SESSIONS,
            Collection::Patients => PATIENTS,
            Collection::Appointments => APPOINTMENTS,
            Collection::MedicalRecords => MEDICAL_RECORDS,
            Collection::Prescriptions => PRESCRIPTIONS,
            Collection::PrescriptionItems => PRESCRIPTION_ITEMS,
            Collection::Medications => MEDICATIONS,
            Collection::Services => SERVICES,
            Collection::Invoices => INVOICES,
            Collection::InvoiceItems => INVOICE_ITEMS,
            Collection::Notifications => NOTIFICATIONS,
            Collection::AuditLogs => AUDIT_LOGS,
            Collection::Settings => SETTINGS,
            Collection::Backups => BACKUPS,
        }
    }

    pub fn index(&self, name: &str) -> Option<&'static IndexDef> {
        self.indexes().iter().find(|idx| idx.name == name)
    }

    /// Fields that must be present and non-empty on every write
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["username", "passwordHash", "email", "role"],
            Collection::Sessions => &["userId", "token", "expiry"],
            Collection::Patients => &["name"],
            Collection::Appointments => &["patientId", "doctorId", "date"],
            Collection::MedicalRecords => &["patientId", "doctorId", "diagnosis"],
            Collection::Prescriptions => &["patientId", "doctorId"],
            Collection::PrescriptionItems => &["prescriptionId", "medicationId"],
            Collection::Medications => &["name"],
            Collection::Services => &["name"],
            Collection::Invoices => &["invoiceNumber", "patientId"],
            Collection::InvoiceItems => &["invoiceId"],
            Collection::Notifications => &["userId", "title"],
            Collection::AuditLogs => &["action", "table"],
            Collection::Settings => &["key", "type"],
            Collection::Backups => &["data"],
        }
    }

    /// Fields that never leave the store in audit snapshots or exports
    pub fn secret_fields(&self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["passwordHash"],
            Collection::Sessions => &["token"],
            _ => &[],
        }
    }

    /// DDL for the backing table
    pub(crate) fn create_table_sql(&self) -> String {
        let key_column = if self.is_auto_increment() {
            "id INTEGER PRIMARY KEY AUTOINCREMENT"
        } else {
            "id TEXT PRIMARY KEY NOT NULL"
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, data TEXT NOT NULL)",
            self.as_str(),
            key_column
        )
    }

    /// DDL for every secondary index of the collection
    pub(crate) fn create_index_sql(&self) -> Vec<String> {
        self.indexes()
            .iter()
            .map(|idx| {
                format!(
                    "CREATE {}INDEX IF NOT EXISTS idx_{}_{} ON {} (json_extract(data, '$.{}'))",
                    if idx.unique { "UNIQUE " } else { "" },
                    self.as_str(),
                    idx.name,
                    self.as_str(),
                    idx.field
                )
            })
            .collect()
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_from_str_accepts_both_spellings() {
        assert_eq!(Collection::from_str("medical_records"), Some(Collection::MedicalRecords));
        assert_eq!(Collection::from_str("medicalRecords"), Some(Collection::MedicalRecords));
        assert_eq!(Collection::from_str("auditLogs"), Some(Collection::AuditLogs));
        assert_eq!(Collection::from_str("users"), Some(Collection::Users));
        assert_eq!(Collection::from_str("doctors"), None);
    }

    #[test]
    fn test_every_collection_roundtrips() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_str(collection.as_str()), Some(collection));
        }
    }

    #[test]
    fn test_settings_keyed_by_text() {
        assert_eq!(Collection::Settings.key_field(), "key");
        assert!(!Collection::Settings.is_auto_increment());
        assert!(Collection::Settings.create_table_sql().contains("id TEXT PRIMARY KEY"));
        assert!(Collection::Patients
            .create_table_sql()
            .contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn test_unique_indexes_emit_unique_ddl() {
        let ddl = Collection::Patients.create_index_sql();
        assert!(ddl.iter().any(|s| s.starts_with("CREATE UNIQUE INDEX")
            && s.contains("idx_patients_nationalId")
            && s.contains("'$.nationalId'")));
        assert!(ddl.iter().any(|s| s.starts_with("CREATE INDEX") && s.contains("'$.phone'")));
        assert!(Collection::Users.index("username").unwrap().unique);
        assert!(Collection::Users.index("nope").is_none());
    }
}
