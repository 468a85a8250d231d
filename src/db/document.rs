//! Document representation and the in-memory query helpers (filtering,
//! sorting, substring search) applied on top of table scans.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::{StoreError, StoreResult};
use super::schema::Collection;

/// A stored record: a JSON object with camelCase fields.
pub type Document = Map<String, Value>;

/// Primary key of a record. Integer for auto-increment collections,
/// text for keyed ones (settings).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Int(i64),
    Text(String),
}

impl RecordKey {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RecordKey::Int),
            Value::String(s) if !s.is_empty() => Some(RecordKey::Text(s.clone())),
            _ => None,
        }
    }

    /// Parses a key coming from a URL path segment
    pub fn parse_for(collection: Collection, raw: &str) -> StoreResult<Self> {
        if collection.is_auto_increment() {
            raw.parse::<i64>()
                .map(RecordKey::Int)
                .map_err(|_| StoreError::validation(format!("Invalid {} id: {}", collection, raw)))
        } else {
            Ok(RecordKey::Text(raw.to_string()))
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RecordKey::Int(i) => Some(*i),
            RecordKey::Text(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(i) => Value::from(*i),
            RecordKey::Text(s) => Value::from(s.clone()),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Int(i) => write!(f, "{}", i),
            RecordKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        RecordKey::Int(id)
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        RecordKey::Text(key.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        RecordKey::Text(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Some(SortOrder::Asc),
            "desc" | "descending" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Exact-match filters (logical AND) plus an optional single-field sort.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filters: Vec<(String, Value)>,
    pub sort_field: Option<String>,
    pub sort_order: SortOrder,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    /// Keeps the documents matching every filter, sorted when a field is set
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut docs: Vec<Document> = docs
            .into_iter()
            .filter(|doc| matches_filters(doc, &self.filters))
            .collect();
        if let Some(field) = &self.sort_field {
            sort_documents(&mut docs, field, self.sort_order);
        }
        docs
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

pub fn matches_filters(doc: &Document, filters: &[(String, Value)]) -> bool {
    filters.iter().all(|(field, expected)| {
        let actual = doc.get(field).unwrap_or(&Value::Null);
        values_equal(actual, expected)
    })
}

/// Total order over JSON values used for sorting. Missing and null sort
/// first, then booleans, numbers, strings, arrays and objects. Among strings,
/// RFC 3339 timestamps come first in chronological order, the rest follow
/// lexically.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => dx.cmp(&dy),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub fn sort_documents(docs: &mut [Document], field: &str, order: SortOrder) {
    docs.sort_by(|a, b| {
        let ord = compare_values(a.get(field), b.get(field));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// String form of a field used for substring search
fn searchable_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Case-insensitive substring match of `query` against any of `fields`
pub fn matches_search(doc: &Document, query: &str, fields: &[String]) -> bool {
    let needle = query.to_lowercase();
    fields.iter().any(|field| {
        doc.get(field)
            .map(|v| searchable_text(v).to_lowercase().contains(&needle))
            .unwrap_or(false)
    })
}

/// Copy of `doc` with the collection's secret fields removed
pub fn redact(collection: Collection, doc: &Document) -> Document {
    let mut copy = doc.clone();
    for field in collection.secret_fields() {
        copy.remove(*field);
    }
    copy
}

pub fn to_document<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::validation(format!(
            "Expected a JSON object, got {}",
            other
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let d = doc(json!({"status": "scheduled", "doctorId": 3}));
        assert!(matches_filters(&d, &[("status".into(), json!("scheduled"))]));
        assert!(matches_filters(
            &d,
            &[("status".into(), json!("scheduled")), ("doctorId".into(), json!(3.0))]
        ));
        assert!(!matches_filters(
            &d,
            &[("status".into(), json!("scheduled")), ("doctorId".into(), json!(4))]
        ));
        assert!(matches_filters(&d, &[("missing".into(), Value::Null)]));
    }

    #[test]
    fn test_sort_orders_dates_chronologically() {
        let mut docs = vec![
            doc(json!({"id": 1, "date": "2024-03-01T10:00:00Z"})),
            doc(json!({"id": 2, "date": "2024-03-01T09:59:59.500Z"})),
            doc(json!({"id": 3})),
        ];
        sort_documents(&mut docs, "date", SortOrder::Asc);
        let ids: Vec<i64> = docs.iter().map(|d| d["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        sort_documents(&mut docs, "date", SortOrder::Desc);
        assert_eq!(docs[0]["id"], json!(1));
    }

    #[test]
    fn test_mixed_strings_order_is_transitive() {
        let early = json!("2024-05-01T08:00:00+10:00");
        let late = json!("2024-04-30T23:00:00Z");
        let text = json!("2024-05-01 walk-in");
        assert_eq!(compare_values(Some(&early), Some(&late)), Ordering::Less);
        assert_eq!(compare_values(Some(&late), Some(&text)), Ordering::Less);
        assert_eq!(compare_values(Some(&early), Some(&text)), Ordering::Less);
        assert_eq!(compare_values(Some(&text), Some(&early)), Ordering::Greater);

        let orders = [[0, 1, 2], [2, 1, 0], [1, 2, 0], [2, 0, 1]];
        let values = [&text, &late, &early];
        for order in orders {
            let mut docs: Vec<Document> = order
                .iter()
                .map(|&i| doc(json!({"when": values[i]})))
                .collect();
            sort_documents(&mut docs, "when", SortOrder::Asc);
            let sorted: Vec<&Value> = docs.iter().map(|d| &d["when"]).collect();
            assert_eq!(sorted, vec![&early, &late, &text]);
        }

        // mixed types rank by kind
        assert_eq!(compare_values(Some(&json!(true)), Some(&json!(0))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(5)), Some(&json!("1"))), Ordering::Less);
        assert_eq!(compare_values(None, Some(&json!(false))), Ordering::Less);
    }

    #[test]
    fn test_sort_numbers_numerically() {
        let mut docs = vec![
            doc(json!({"n": 10})),
            doc(json!({"n": 9.5})),
            doc(json!({"n": 100})),
        ];
        sort_documents(&mut docs, "n", SortOrder::Asc);
        assert_eq!(docs[0]["n"], json!(9.5));
        assert_eq!(docs[2]["n"], json!(100));
    }

    #[test]
    fn test_search_is_case_insensitive_and_field_scoped() {
        let d = doc(json!({"name": "Amina Yusuf", "phone": "0551234567", "notes": "allergic"}));
        let fields = vec!["name".to_string(), "phone".to_string()];
        assert!(matches_search(&d, "amina", &fields));
        assert!(matches_search(&d, "YUSUF", &fields));
        assert!(matches_search(&d, "1234", &fields));
        assert!(!matches_search(&d, "allergic", &fields));
    }

    #[test]
    fn test_redact_strips_secrets() {
        let user = doc(json!({"username": "dr.ali", "passwordHash": "$argon2id$..."}));
        let clean = redact(Collection::Users, &user);
        assert!(clean.get("passwordHash").is_none());
        assert_eq!(clean["username"], json!("dr.ali"));

        let patient = doc(json!({"name": "X"}));
        assert_eq!(redact(Collection::Patients, &patient), patient);
    }

    #[test]
    fn test_record_key_parsing() {
        assert_eq!(
            RecordKey::parse_for(Collection::Patients, "42").unwrap(),
            RecordKey::Int(42)
        );
        assert!(RecordKey::parse_for(Collection::Patients, "abc").is_err());
        assert_eq!(
            RecordKey::parse_for(Collection::Settings, "taxRate").unwrap(),
            RecordKey::Text("taxRate".into())
        );
        assert_eq!(RecordKey::from_value(&json!(7)), Some(RecordKey::Int(7)));
        assert_eq!(RecordKey::from_value(&json!(null)), None);
    }
}
