//! Backup and export models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Version stamped into export metadata
pub const EXPORT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Used when the `maxBackups` setting is missing
pub const DEFAULT_MAX_BACKUPS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Manual,
    Automatic,
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupType::Manual => write!(f, "manual"),
            BackupType::Automatic => write!(f, "automatic"),
        }
    }
}

/// Stored backup: metadata plus the serialized export document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<i64>,
    pub size_bytes: i64,
    pub version: String,
    pub included_tables: Vec<String>,
    pub record_count: i64,
    /// JSON text of an [`ExportDocument`]
    pub data: String,
}

/// Backup listing entry; never carries the dump itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub id: i64,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<i64>,
    pub size_bytes: i64,
    pub size_human: String,
    pub version: String,
    pub included_tables: Vec<String>,
    pub record_count: i64,
}

impl From<Backup> for BackupSummary {
    fn from(backup: Backup) -> Self {
        Self {
            id: backup.id.unwrap_or_default(),
            backup_type: backup.backup_type,
            created_at: backup.created_at,
            created_by: backup.created_by,
            size_human: format_bytes(backup.size_bytes),
            size_bytes: backup.size_bytes,
            version: backup.version,
            included_tables: backup.included_tables,
            record_count: backup.record_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub export_date: DateTime<Utc>,
    pub version: String,
    pub clinic_name: String,
    pub included_tables: Vec<String>,
}

/// `{metadata, data: {<collection>: [records]}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub data: BTreeMap<String, Vec<Value>>,
}

impl ExportDocument {
    pub fn record_count(&self) -> usize {
        self.data.values().map(Vec::len).sum()
    }
}

pub fn format_bytes(size: i64) -> String {
    if size >= 1_073_741_824 {
        format!("{:.2} GB", size as f64 / 1_073_741_824.0)
    } else if size >= 1_048_576 {
        format!("{:.2} MB", size as f64 / 1_048_576.0)
    } else if size >= 1024 {
        format!("{:.2} KB", size as f64 / 1024.0)
    } else {
        format!("{} B", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1_048_576), "5.00 MB");
    }

    #[test]
    fn test_export_document_shape() {
        let mut data = BTreeMap::new();
        data.insert("patients".to_string(), vec![serde_json::json!({"id": 1})]);
        data.insert("users".to_string(), vec![]);
        let doc = ExportDocument {
            metadata: ExportMetadata {
                export_date: Utc::now(),
                version: EXPORT_VERSION.to_string(),
                clinic_name: "Test Clinic".to_string(),
                included_tables: vec!["patients".to_string(), "users".to_string()],
            },
            data,
        };
        assert_eq!(doc.record_count(), 1);

        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["metadata"]["exportDate"].is_string());
        assert_eq!(json["metadata"]["clinicName"], "Test Clinic");
        assert_eq!(json["data"]["patients"][0]["id"], 1);
    }
}
