//! In-app notification models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification `type` values raised by the store itself
pub mod kinds {
    pub const NEW_APPOINTMENT: &str = "new_appointment";
    pub const APPOINTMENT_REMINDER: &str = "appointment_reminder";
    pub const LOW_STOCK: &str = "low_stock";
    pub const OVERDUE_INVOICE: &str = "overdue_invoice";
    pub const SYSTEM: &str = "system";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub user_id: i64,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub related_id: Option<i64>,
}

fn default_kind() -> String {
    kinds::SYSTEM.to_string()
}

impl Notification {
    pub fn new(
        user_id: i64,
        kind: &str,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            user_id,
            kind: kind.to_string(),
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Normal,
            is_read: false,
            created_at: Utc::now(),
            scheduled_at: None,
            related_id: None,
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn related_to(mut self, related_id: i64) -> Self {
        self.related_id = Some(related_id);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}
