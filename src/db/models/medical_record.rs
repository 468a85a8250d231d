//! Medical record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentItem {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vitals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oxygen_saturation: Option<u32>,
}

impl Vitals {
    /// Body-mass index from weight (kg) and height (cm)
    pub fn bmi(&self) -> Option<f64> {
        match (self.weight, self.height) {
            (Some(w), Some(h)) if h > 0.0 => {
                let m = h / 100.0;
                Some((w / (m * m) * 10.0).round() / 10.0)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub patient_id: i64,
    pub doctor_id: i64,
    /// At most one record per appointment
    #[serde(default)]
    pub appointment_id: Option<i64>,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    pub diagnosis: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub treatment: Vec<TreatmentItem>,
    #[serde(default)]
    pub vitals: Option<Vitals>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub severity: Option<String>,
}

fn default_status() -> String {
    "active".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bmi() {
        let vitals = Vitals {
            weight: Some(70.0),
            height: Some(175.0),
            ..Default::default()
        };
        assert_eq!(vitals.bmi(), Some(22.9));
        assert_eq!(Vitals::default().bmi(), None);
    }

    #[test]
    fn test_vitals_subset_serializes_sparse() {
        let vitals = Vitals {
            heart_rate: Some(72),
            ..Default::default()
        };
        let json = serde_json::to_value(&vitals).unwrap();
        assert_eq!(json, serde_json::json!({"heartRate": 72}));
    }
}
