//! Clinic settings: a flat key → typed value store.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::appointment::MAX_DURATION_MINUTES;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref TEL_RE: Regex = Regex::new(r"^\+?[0-9 ()\-]{5,20}$").unwrap();
}

/// Declared type of a setting; drives how its value is parsed and validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    Text,
    Number,
    Boolean,
    Select,
    Array,
    Object,
    Image,
    Textarea,
    Tel,
    Email,
    Url,
    Time,
    Date,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::Text => "text",
            SettingType::Number => "number",
            SettingType::Boolean => "boolean",
            SettingType::Select => "select",
            SettingType::Array => "array",
            SettingType::Object => "object",
            SettingType::Image => "image",
            SettingType::Textarea => "textarea",
            SettingType::Tel => "tel",
            SettingType::Email => "email",
            SettingType::Url => "url",
            SettingType::Time => "time",
            SettingType::Date => "date",
        }
    }
}

impl std::fmt::Display for SettingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Array(Vec<Value>),
    Object(Map<String, Value>),
    /// Data URL or path; empty when unset
    Image(String),
}

impl SettingValue {
    /// Interprets a raw JSON value according to `setting_type`.
    ///
    /// Numbers and booleans are also accepted in string form, and `null`
    /// reads as an empty string for the text-like types.
    pub fn parse(setting_type: SettingType, raw: &Value) -> Result<Self, String> {
        let mismatch = || format!("Expected a {} value, got {}", setting_type, raw);

        match setting_type {
            SettingType::Number => match raw {
                Value::Number(n) => n.as_f64().map(SettingValue::Number).ok_or_else(mismatch),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(SettingValue::Number)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            SettingType::Boolean => match raw {
                Value::Bool(b) => Ok(SettingValue::Boolean(*b)),
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => Ok(SettingValue::Boolean(true)),
                    "false" | "0" | "no" | "off" => Ok(SettingValue::Boolean(false)),
                    _ => Err(mismatch()),
                },
                Value::Number(n) => Ok(SettingValue::Boolean(n.as_f64() != Some(0.0))),
                _ => Err(mismatch()),
            },
            SettingType::Array => match raw {
                Value::Array(items) => Ok(SettingValue::Array(items.clone())),
                Value::Null => Ok(SettingValue::Array(Vec::new())),
                _ => Err(mismatch()),
            },
            SettingType::Object => match raw {
                Value::Object(map) => Ok(SettingValue::Object(map.clone())),
                Value::Null => Ok(SettingValue::Object(Map::new())),
                _ => Err(mismatch()),
            },
            SettingType::Image => match raw {
                Value::String(s) => Ok(SettingValue::Image(s.clone())),
                Value::Null => Ok(SettingValue::Image(String::new())),
                _ => Err(mismatch()),
            },
            _ => {
                let text = match raw {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(mismatch()),
                };
                validate_text(setting_type, &text)?;
                Ok(SettingValue::Text(text))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            SettingValue::Text(s) | SettingValue::Image(s) => Value::String(s.clone()),
            SettingValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SettingValue::Boolean(b) => Value::Bool(*b),
            SettingValue::Array(items) => Value::Array(items.clone()),
            SettingValue::Object(map) => Value::Object(map.clone()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) | SettingValue::Image(s) => Some(s),
            _ => None,
        }
    }
}

/// Bounds for the number settings that feed date arithmetic, limits or
/// percentages
fn number_range(key: &str) -> Option<(f64, f64)> {
    let range = match key {
        "taxRate" | "lateFeePercent" => (0.0, 100.0),
        "reminderHours" => (0.0, 720.0),
        "paymentTermsDays" | "cancellationPolicyHours" => (0.0, 3650.0),
        "defaultPrescriptionValidityDays" => (1.0, 3650.0),
        "defaultAppointmentDuration" => (1.0, MAX_DURATION_MINUTES as f64),
        "appointmentBuffer" => (0.0, MAX_DURATION_MINUTES as f64),
        "sessionTimeoutHours" => (1.0, 8760.0),
        "passwordMinLength" => (4.0, 128.0),
        "maxBackups" => (1.0, 1000.0),
        "invoiceCounter" => (0.0, 999_999_999.0),
        "defaultRefills" => (0.0, 100.0),
        _ => return None,
    };
    Some(range)
}

fn check_range(key: &str, value: &SettingValue) -> Result<(), String> {
    match (value, number_range(key)) {
        (SettingValue::Number(n), Some((min, max))) if *n < min || *n > max => Err(format!(
            "Setting '{}' must be between {} and {}",
            key, min, max
        )),
        _ => Ok(()),
    }
}

fn validate_text(setting_type: SettingType, text: &str) -> Result<(), String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    let ok = match setting_type {
        SettingType::Email => EMAIL_RE.is_match(text),
        SettingType::Tel => TEL_RE.is_match(text),
        SettingType::Url => text.starts_with("http://") || text.starts_with("https://"),
        SettingType::Time => NaiveTime::parse_from_str(text, "%H:%M").is_ok(),
        SettingType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("Invalid {} value: {}", setting_type, text))
    }
}

/// Stored shape of a setting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingRecord {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    #[serde(default)]
    pub is_advanced: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_category() -> String {
    "general".to_string()
}

/// A setting whose value has been checked against its declared type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SettingRecord", into = "SettingRecord")]
pub struct Setting {
    pub key: String,
    pub value: SettingValue,
    pub category: String,
    pub setting_type: SettingType,
    pub is_advanced: bool,
    pub description: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Setting {
    /// Replaces the value, re-validating it against the declared type
    pub fn set_value(&mut self, raw: &Value) -> Result<(), String> {
        let value = SettingValue::parse(self.setting_type, raw)
            .map_err(|e| format!("Setting '{}': {}", self.key, e))?;
        check_range(&self.key, &value)?;
        self.value = value;
        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

impl TryFrom<SettingRecord> for Setting {
    type Error = String;

    fn try_from(record: SettingRecord) -> Result<Self, Self::Error> {
        let value = SettingValue::parse(record.setting_type, &record.value)
            .map_err(|e| format!("Setting '{}': {}", record.key, e))?;
        check_range(&record.key, &value)?;
        Ok(Setting {
            key: record.key,
            value,
            category: record.category,
            setting_type: record.setting_type,
            is_advanced: record.is_advanced,
            description: record.description,
            updated_at: record.updated_at,
        })
    }
}

impl From<Setting> for SettingRecord {
    fn from(setting: Setting) -> Self {
        SettingRecord {
            value: setting.value.to_json(),
            key: setting.key,
            category: setting.category,
            setting_type: setting.setting_type,
            is_advanced: setting.is_advanced,
            description: setting.description,
            updated_at: setting.updated_at,
        }
    }
}
