//! Billing models: services, invoices, invoice items and the revenue report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Used when the `taxRate` setting is missing
pub const DEFAULT_TAX_RATE: f64 = 15.0;

/// Used when the `invoicePrefix` setting is missing
pub const DEFAULT_INVOICE_PREFIX: &str = "INV-";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub invoice_number: String,
    pub patient_id: i64,
    #[serde(default)]
    pub appointment_id: Option<i64>,
    #[serde(default = "Utc::now")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub tax_amount: f64,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub status: InvoiceStatus,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Invoice {
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == InvoiceStatus::Pending && self.due_date.map(|due| due < now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub invoice_id: i64,
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    pub quantity: i64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItemInput {
    #[serde(default)]
    pub service_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvoice {
    pub patient_id: i64,
    #[serde(default)]
    pub appointment_id: Option<i64>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    pub items: Vec<InvoiceItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceWithItems {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub subtotal: f64,
    pub tax_amount: f64,
    pub total_amount: f64,
}

/// Rounds to cents
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// subtotal = Σ price·quantity, tax = subtotal × rate / 100, total = subtotal + tax
pub fn compute_totals(items: &[InvoiceItemInput], tax_rate: f64) -> InvoiceTotals {
    let subtotal = round_currency(
        items
            .iter()
            .map(|item| item.price * item.quantity as f64)
            .sum(),
    );
    let tax_amount = round_currency(subtotal * tax_rate / 100.0);
    InvoiceTotals {
        subtotal,
        tax_amount,
        total_amount: round_currency(subtotal + tax_amount),
    }
}

/// `<prefix><counter padded to 6 digits>`
pub fn format_invoice_number(prefix: &str, counter: i64) -> String {
    format!("{}{:06}", prefix, counter)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub total_revenue: f64,
    pub invoice_count: usize,
    pub average_invoice: f64,
    /// Keyed by `YYYY-MM-DD`
    pub daily: BTreeMap<String, f64>,
    pub by_category: BTreeMap<String, f64>,
    pub by_payment_method: BTreeMap<String, f64>,
}
