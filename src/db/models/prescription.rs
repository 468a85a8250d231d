//! Prescription, prescription item and medication models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrescriptionStatus {
    #[default]
    Active,
    Dispensed,
    Completed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub patient_id: i64,
    pub doctor_id: i64,
    #[serde(default)]
    pub medical_record_id: Option<i64>,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub status: PrescriptionStatus,
    /// `new` or `refill`
    #[serde(rename = "type", default = "default_type")]
    pub prescription_type: String,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refills_remaining: i64,
    #[serde(default)]
    pub parent_prescription_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_type() -> String {
    "new".to_string()
}

impl Prescription {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PrescriptionStatus::Expired
            || self.expiry_date.map(|expiry| expiry <= now).unwrap_or(false)
    }

    /// Why a refill must be refused, if it must
    pub fn refill_blocker(&self, now: DateTime<Utc>) -> Option<String> {
        if self.refills_remaining <= 0 {
            return Some("No refills remaining on this prescription".to_string());
        }
        if self.is_expired_at(now) {
            return Some("Prescription has expired".to_string());
        }
        if self.status == PrescriptionStatus::Cancelled {
            return Some("Prescription was cancelled".to_string());
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub prescription_id: i64,
    pub medication_id: i64,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub instructions: Option<String>,
}

fn default_quantity() -> i64 {
    1
}

/// Prescription header plus line items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionWithItems {
    #[serde(flatten)]
    pub prescription: Prescription,
    pub items: Vec<PrescriptionItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default = "default_min_stock")]
    pub min_stock_level: i64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_min_stock() -> i64 {
    10
}

fn default_active() -> bool {
    true
}

impl Medication {
    pub fn is_low_stock(&self) -> bool {
        self.is_active && self.stock_quantity <= self.min_stock_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prescription(refills: i64, expiry: Option<DateTime<Utc>>) -> Prescription {
        Prescription {
            id: Some(1),
            patient_id: 1,
            doctor_id: 2,
            medical_record_id: None,
            date: Utc::now(),
            status: PrescriptionStatus::Active,
            prescription_type: "new".to_string(),
            expiry_date: expiry,
            refills_remaining: refills,
            parent_prescription_id: None,
            notes: None,
        }
    }

    #[test]
    fn test_refill_blockers() {
        let now = Utc::now();
        assert!(prescription(0, None).refill_blocker(now).is_some());
        assert!(prescription(-1, None).refill_blocker(now).is_some());
        assert!(prescription(2, Some(now - chrono::Duration::days(1)))
            .refill_blocker(now)
            .unwrap()
            .contains("expired"));
        assert!(prescription(2, Some(now + chrono::Duration::days(30)))
            .refill_blocker(now)
            .is_none());
        assert!(prescription(1, None).refill_blocker(now).is_none());
    }

    #[test]
    fn test_low_stock() {
        let mut med: Medication =
            serde_json::from_value(serde_json::json!({"name": "Amoxicillin 500mg", "stockQuantity": 10}))
                .unwrap();
        assert!(med.is_low_stock());
        med.stock_quantity = 11;
        assert!(!med.is_low_stock());
        med.stock_quantity = 0;
        med.is_active = false;
        assert!(!med.is_low_stock());
    }
}
