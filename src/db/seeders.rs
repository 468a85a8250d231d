//! Database seeders for first-run data
//!
//! The default administrator and the settings catalog. Both only ever add
//! what is missing, so they are safe to run on every start.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::info;

use super::document::{to_document, RecordKey};
use super::models::{Actor, Role, SettingRecord, SettingType, User};
use super::schema::Collection;
use super::store;
use crate::auth::hash_password;
use crate::config::AuthConfig;

/// Creates the default administrator when the user table is empty
pub async fn seed_default_admin(pool: &SqlitePool, auth: &AuthConfig) -> Result<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let admin = User {
        id: None,
        username: auth.admin_username.clone(),
        password_hash: hash_password(&auth.admin_password)?,
        email: auth.admin_email.clone(),
        role: Role::Admin,
        full_name: "Administrator".to_string(),
        is_active: true,
        created_at: chrono::Utc::now(),
        last_login: None,
    };

    let mut tx = pool.begin().await?;
    store::add_record(&mut *tx, Collection::Users, to_document(&admin)?, Actor::System)
        .await
        .context("Failed to seed default admin")?;
    tx.commit().await?;

    tracing::warn!(
        username = %auth.admin_username,
        "Created default admin account; change its password after first login"
    );
    Ok(())
}

fn setting(
    key: &str,
    value: Value,
    category: &str,
    setting_type: SettingType,
    is_advanced: bool,
    description: &str,
) -> SettingRecord {
    SettingRecord {
        key: key.to_string(),
        value,
        category: category.to_string(),
        setting_type,
        is_advanced,
        description: description.to_string(),
        updated_at: None,
    }
}

/// The built-in settings catalog
pub fn default_settings() -> Vec<SettingRecord> {
    use SettingType::*;

    vec![
        // ==================== CLINIC ====================
        setting("clinicName", json!("Clinic"), "clinic", Text, false, "Clinic name shown on documents"),
        setting("clinicAddress", json!(""), "clinic", Textarea, false, "Postal address"),
        setting("clinicPhone", json!(""), "clinic", Tel, false, "Main phone number"),
        setting("clinicEmail", json!(""), "clinic", Email, false, "Contact email"),
        setting("clinicWebsite", json!(""), "clinic", Url, false, "Public website"),
        setting("clinicLogo", json!(""), "clinic", Image, false, "Logo used on invoices and prescriptions"),
        setting("licenseNumber", json!(""), "clinic", Text, false, "Operating license number"),
        setting("taxNumber", json!(""), "clinic", Text, false, "Tax registration number"),
        // ==================== SCHEDULE ====================
        setting("workingDays", json!(["monday", "tuesday", "wednesday", "thursday", "friday"]), "schedule", Array, false, "Days the clinic is open"),
        setting("openingTime", json!("08:00"), "schedule", Time, false, "Opening time"),
        setting("closingTime", json!("17:00"), "schedule", Time, false, "Closing time"),
        setting("lunchBreakStart", json!("12:00"), "schedule", Time, false, "Lunch break start"),
        setting("lunchBreakEnd", json!("13:00"), "schedule", Time, false, "Lunch break end"),
        setting("holidays", json!([]), "schedule", Array, false, "Closed dates (YYYY-MM-DD)"),
        // ==================== APPOINTMENTS ====================
        setting("defaultAppointmentDuration", json!(30), "appointments", Number, false, "Default appointment length in minutes"),
        setting("appointmentTypes", json!(["consultation", "follow-up", "check-up", "emergency", "procedure"]), "appointments", Array, false, "Bookable appointment types"),
        setting("maxAppointmentsPerDay", json!(40), "appointments", Number, false, "Booking cap per doctor per day"),
        setting("allowOnlineBooking", json!(false), "appointments", Boolean, false, "Accept bookings from the patient portal"),
        setting("appointmentBuffer", json!(0), "appointments", Number, true, "Minutes kept free between appointments"),
        setting("cancellationPolicyHours", json!(24), "appointments", Number, false, "Minimum notice for cancellations"),
        setting("appointmentNumberPrefix", json!("APT-"), "appointments", Text, true, "Prefix for generated appointment numbers"),
        // ==================== BILLING ====================
        setting("currency", json!("USD"), "billing", Select, false, "Currency code"),
        setting("currencySymbol", json!("$"), "billing", Text, false, "Currency symbol"),
        setting("taxRate", json!(15), "billing", Number, false, "Tax rate in percent applied to invoices"),
        setting("invoicePrefix", json!("INV-"), "billing", Text, false, "Prefix for invoice numbers"),
        setting("invoiceCounter", json!(0), "billing", Number, true, "Last issued invoice number"),
        setting("paymentTermsDays", json!(30), "billing", Number, false, "Days until an invoice is due"),
        setting("paymentMethods", json!(["cash", "card", "mobile_money", "insurance", "bank_transfer"]), "billing", Array, false, "Accepted payment methods"),
        setting("invoiceFooter", json!("Thank you for choosing our clinic."), "billing", Textarea, false, "Footer printed on invoices"),
        setting("lateFeePercent", json!(0), "billing", Number, true, "Late fee applied to overdue invoices"),
        // ==================== NOTIFICATIONS ====================
        setting("appointmentNotifications", json!(true), "notifications", Boolean, false, "Notify doctors about new appointments"),
        setting("appointmentReminders", json!(true), "notifications", Boolean, false, "Create reminders for upcoming appointments"),
        setting("reminderHours", json!(24), "notifications", Number, false, "How far ahead reminders are raised"),
        setting("lowStockAlerts", json!(true), "notifications", Boolean, false, "Alert admins when medication stock is low"),
        setting("overdueInvoiceAlerts", json!(true), "notifications", Boolean, false, "Alert admins about overdue invoices"),
        setting("emailNotifications", json!(false), "notifications", Boolean, false, "Send notifications by email"),
        setting("smsNotifications", json!(false), "notifications", Boolean, false, "Send notifications by SMS"),
        // ==================== MEDICAL ====================
        setting("defaultPrescriptionValidityDays", json!(30), "medical", Number, false, "Days a prescription stays valid"),
        setting("defaultRefills", json!(0), "medical", Number, false, "Refills granted on new prescriptions"),
        setting("bloodTypes", json!(["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"]), "medical", Array, false, "Selectable blood types"),
        setting("medicationCategories", json!(["antibiotic", "analgesic", "antihypertensive", "antidiabetic", "vitamin", "other"]), "medical", Array, false, "Medication categories"),
        setting("defaultMinStockLevel", json!(10), "medical", Number, false, "Low-stock threshold for new medications"),
        setting("vitalUnits", json!({"temperature": "C", "weight": "kg", "height": "cm"}), "medical", Object, true, "Units used when recording vitals"),
        setting("requireDiagnosis", json!(true), "medical", Boolean, false, "Medical records must carry a diagnosis"),
        // ==================== SECURITY ====================
        setting("sessionTimeoutHours", json!(24), "security", Number, false, "Session lifetime in hours"),
        setting("passwordMinLength", json!(8), "security", Number, false, "Minimum password length"),
        setting("requireStrongPasswords", json!(true), "security", Boolean, false, "Require mixed case and digits"),
        setting("maxLoginAttempts", json!(5), "security", Number, true, "Failed attempts before lockout"),
        setting("auditLogRetentionDays", json!(365), "security", Number, true, "How long audit entries are kept"),
        // ==================== BACKUP ====================
        setting("autoBackup", json!(true), "backup", Boolean, false, "Create automatic backups"),
        setting("backupFrequency", json!("daily"), "backup", Select, false, "Automatic backup frequency"),
        setting("maxBackups", json!(10), "backup", Number, false, "Backups kept before the oldest are pruned"),
        setting("lastBackupDate", json!(""), "backup", Date, true, "Date of the most recent backup"),
        // ==================== APPEARANCE ====================
        setting("theme", json!("light"), "appearance", Select, false, "Dashboard theme"),
        setting("primaryColor", json!("#2563eb"), "appearance", Text, false, "Accent color"),
        setting("language", json!("en"), "appearance", Select, false, "Interface language"),
        setting("dateFormat", json!("DD/MM/YYYY"), "appearance", Select, false, "Date display format"),
        setting("timeFormat", json!("24h"), "appearance", Select, false, "Time display format"),
        setting("timezone", json!("UTC"), "appearance", Text, false, "Clinic timezone"),
        setting("itemsPerPage", json!(25), "appearance", Number, false, "Rows per table page"),
        // ==================== SYSTEM ====================
        setting("maintenanceMode", json!(false), "system", Boolean, true, "Reject non-admin logins"),
        setting("dashboardWidgets", json!({"appointments": true, "revenue": true, "inventory": true}), "system", Object, true, "Visible dashboard widgets"),
    ]
}

/// Inserts every catalog entry that is not stored yet. The session lifetime
/// starts from the configured TTL.
pub async fn seed_default_settings(pool: &SqlitePool, auth: &AuthConfig) -> Result<()> {
    let mut conn = pool.acquire().await?;
    let mut seeded = 0;

    for mut record in default_settings() {
        if record.key == "sessionTimeoutHours" {
            record.value = json!(auth.session_ttl_hours.clamp(1, 8760));
        }
        let key = RecordKey::Text(record.key.clone());
        if store::fetch(&mut *conn, Collection::Settings, &key)
            .await?
            .is_some()
        {
            continue;
        }
        store::insert(&mut *conn, Collection::Settings, &to_document(&record)?).await?;
        seeded += 1;
    }

    if seeded > 0 {
        info!("Seeded {} default settings", seeded);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Setting;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_is_valid_and_unique() {
        let catalog = default_settings();
        assert!(catalog.len() >= 60);

        let keys: HashSet<&str> = catalog.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys.len(), catalog.len());

        for record in catalog {
            let key = record.key.clone();
            assert!(Setting::try_from(record).is_ok(), "invalid default for {}", key);
        }
    }
}
