//! Patient model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Unique when present
    #[serde(default)]
    pub national_id: Option<String>,
    /// Unique when present
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub name: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_visits: i64,
}

fn default_active() -> bool {
    true
}

impl Patient {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            national_id: None,
            email: None,
            phone: None,
            name: name.into(),
            date_of_birth: None,
            gender: None,
            address: None,
            blood_type: None,
            allergies: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
            last_visit: None,
            total_visits: 0,
        }
    }

    /// Age in whole years at `today`
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        self.date_of_birth.and_then(|dob| today.years_since(dob))
    }

    /// Counts a booked visit; `lastVisit` only ever moves forward.
    pub fn record_visit(&mut self, at: DateTime<Utc>) {
        self.total_visits += 1;
        if self.last_visit.map(|prev| at > prev).unwrap_or(true) {
            self.last_visit = Some(at);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_visit_keeps_latest() {
        let mut patient = Patient::new("Kofi Mensah");
        let later = Utc::now() + chrono::Duration::days(3);
        let earlier = Utc::now() + chrono::Duration::days(1);

        patient.record_visit(later);
        patient.record_visit(earlier);

        assert_eq!(patient.total_visits, 2);
        assert_eq!(patient.last_visit, Some(later));
    }

    #[test]
    fn test_age_on() {
        let mut patient = Patient::new("Ama");
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()), None);

        patient.date_of_birth = NaiveDate::from_ymd_opt(1990, 6, 15);
        assert_eq!(
            patient.age_on(NaiveDate::from_ymd_opt(2024, 6, 14).unwrap()),
            Some(33)
        );
        assert_eq!(
            patient.age_on(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            Some(34)
        );
    }

    #[test]
    fn test_minimal_document_deserializes() {
        let patient: Patient = serde_json::from_value(serde_json::json!({"name": "Esi"})).unwrap();
        assert!(patient.is_active);
        assert_eq!(patient.total_visits, 0);
        assert!(patient.national_id.is_none());
    }
}
