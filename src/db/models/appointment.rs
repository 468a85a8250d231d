//! Appointment models and the interval arithmetic behind conflict detection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::checked_add_minutes;

/// Default appointment length in minutes
pub const DEFAULT_DURATION_MINUTES: i64 = 30;

/// Longest bookable appointment in minutes
pub const MAX_DURATION_MINUTES: i64 = 1440;

/// Gap under which two consecutive appointments of one doctor are flagged
/// by the dashboard heuristic
pub const CLOSE_SPACING_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    /// Cancelled appointments never block a slot
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub patient_id: i64,
    pub doctor_id: i64,
    pub date: DateTime<Utc>,
    /// Minutes
    #[serde(default = "default_duration")]
    pub duration: i64,
    #[serde(default)]
    pub status: AppointmentStatus,
    #[serde(rename = "type", default = "default_type")]
    pub appointment_type: String,
    #[serde(default)]
    pub appointment_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_duration() -> i64 {
    DEFAULT_DURATION_MINUTES
}

fn default_type() -> String {
    "consultation".to_string()
}

fn check_slot(date: DateTime<Utc>, duration: i64) -> Result<(), String> {
    if !(1..=MAX_DURATION_MINUTES).contains(&duration) {
        return Err(format!(
            "Duration must be between 1 and {} minutes",
            MAX_DURATION_MINUTES
        ));
    }
    checked_add_minutes(date, duration)
        .map(|_| ())
        .ok_or_else(|| "Appointment date is out of range".to_string())
}

impl Appointment {
    /// Rejects slots that could never be compared against others
    pub fn validate(&self) -> Result<(), String> {
        check_slot(self.date, self.duration)
    }

    pub fn end(&self) -> DateTime<Utc> {
        checked_add_minutes(self.date, self.duration).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Half-open overlap test of `[date, date+duration)` against `[start, end)`
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end() && end > self.date
    }
}

/// Booking request, also used for the standalone conflict check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentRequest {
    pub doctor_id: i64,
    pub patient_id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(rename = "type", default)]
    pub appointment_type: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AppointmentRequest {
    pub fn duration_minutes(&self) -> i64 {
        self.duration.unwrap_or(DEFAULT_DURATION_MINUTES)
    }

    pub fn validate(&self) -> Result<(), String> {
        check_slot(self.date, self.duration_minutes())
    }

    pub fn end(&self) -> DateTime<Utc> {
        checked_add_minutes(self.date, self.duration_minutes()).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictParty {
    Doctor,
    Patient,
}

/// First overlapping appointment found for a requested slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentConflict {
    pub party: ConflictParty,
    pub conflicting_appointment_id: Option<i64>,
    pub reason: String,
}

/// Dashboard metric: consecutive same-doctor appointments spaced too closely
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStats {
    pub appointments_checked: usize,
    pub conflicts: usize,
    pub doctors_affected: Vec<i64>,
}

/// Finds the first appointment in `existing` that overlaps `[start, end)`
pub fn find_overlap<'a>(
    existing: &'a [Appointment],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<&'a Appointment> {
    existing
        .iter()
        .filter(|a| a.status.occupies_slot())
        .find(|a| a.overlaps(start, end))
}

/// Counts consecutive pairs (per doctor, by start time) that begin less than
/// [`CLOSE_SPACING_MINUTES`] apart. Deliberately looser than the booking check.
pub fn close_spacing_stats(appointments: &[Appointment]) -> ConflictStats {
    use std::collections::BTreeMap;

    let mut by_doctor: BTreeMap<i64, Vec<&Appointment>> = BTreeMap::new();
    for appointment in appointments.iter().filter(|a| a.status.occupies_slot()) {
        by_doctor.entry(appointment.doctor_id).or_default().push(appointment);
    }

    let mut stats = ConflictStats {
        appointments_checked: by_doctor.values().map(Vec::len).sum(),
        ..Default::default()
    };

    for (doctor_id, mut list) in by_doctor {
        list.sort_by_key(|a| a.date);
        let flagged = list
            .windows(2)
            .filter(|pair| pair[1].date - pair[0].date < Duration::minutes(CLOSE_SPACING_MINUTES))
            .count();
        if flagged > 0 {
            stats.conflicts += flagged;
            stats.doctors_affected.push(doctor_id);
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, 0).unwrap()
    }

    fn appt(id: i64, doctor_id: i64, start: DateTime<Utc>, duration: i64) -> Appointment {
        Appointment {
            id: Some(id),
            patient_id: 100 + id,
            doctor_id,
            date: start,
            duration,
            status: AppointmentStatus::Scheduled,
            appointment_type: "consultation".to_string(),
            appointment_number: None,
            notes: None,
            created_at: start,
        }
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = appt(1, 1, at(9, 0), 30);
        assert!(a.overlaps(at(9, 15), at(9, 45)));
        assert!(a.overlaps(at(8, 45), at(9, 1)));
        // touching intervals do not overlap
        assert!(!a.overlaps(at(9, 30), at(10, 0)));
        assert!(!a.overlaps(at(8, 30), at(9, 0)));
    }

    #[test]
    fn test_find_overlap_skips_cancelled() {
        let mut cancelled = appt(1, 1, at(9, 0), 30);
        cancelled.status = AppointmentStatus::Cancelled;
        let other = appt(2, 1, at(10, 0), 30);
        let existing = vec![cancelled, other];

        assert!(find_overlap(&existing, at(9, 10), at(9, 40)).is_none());
        assert_eq!(
            find_overlap(&existing, at(10, 20), at(10, 50)).and_then(|a| a.id),
            Some(2)
        );
    }

    #[test]
    fn test_request_duration_defaults() {
        let request = AppointmentRequest {
            doctor_id: 1,
            patient_id: 2,
            date: at(9, 0),
            duration: None,
            appointment_type: None,
            notes: None,
        };
        assert_eq!(request.duration_minutes(), 30);
        assert_eq!(request.end(), at(9, 30));

        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_duration_must_be_bounded() {
        let request = AppointmentRequest {
            doctor_id: 1,
            patient_id: 2,
            date: at(9, 0),
            duration: Some(0),
            appointment_type: None,
            notes: None,
        };
        assert!(request.validate().is_err());

        let huge = AppointmentRequest {
            duration: Some(200_000_000_000),
            ..request.clone()
        };
        assert!(huge.validate().is_err());
        // end() saturates instead of overflowing
        assert_eq!(huge.end(), DateTime::<Utc>::MAX_UTC);

        let negative = appt(1, 1, at(9, 0), -600);
        assert!(negative.validate().is_err());

        let full_day = AppointmentRequest {
            duration: Some(MAX_DURATION_MINUTES),
            ..request
        };
        assert!(full_day.validate().is_ok());
    }

    #[test]
    fn test_close_spacing_counts_consecutive_pairs_per_doctor() {
        let appointments = vec![
            appt(1, 1, at(9, 0), 15),
            appt(2, 1, at(9, 20), 15),
            appt(3, 1, at(10, 0), 15),
            appt(4, 2, at(9, 0), 15),
            appt(5, 2, at(9, 10), 15),
            appt(6, 3, at(9, 0), 15),
        ];
        let stats = close_spacing_stats(&appointments);
        assert_eq!(stats.appointments_checked, 6);
        assert_eq!(stats.conflicts, 2);
        assert_eq!(stats.doctors_affected, vec![1, 2]);
    }
}
