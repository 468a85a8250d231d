//! Invoicing, payments and revenue reporting.
//!
//! Invoice numbers come from the persisted `invoiceCounter` setting. The
//! counter is read and bumped under the `invoice_counter` lock inside the same
//! transaction that writes the invoice, so numbers are never handed out twice.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::HashMap;

use super::notifications::{active_admins, insert_notification, notification_exists};
use super::settings::{bool_setting, number_setting, store_setting_value, text_setting};
use crate::db::document::{from_document, to_document, ListQuery, RecordKey};
use crate::db::error::{StoreError, StoreResult};
use crate::db::models::{
    checked_add_days, compute_totals, format_invoice_number, kinds, round_currency, Actor, Invoice, InvoiceItem,
    InvoiceStatus, InvoiceWithItems, NewInvoice, Notification, NotificationPriority, Patient,
    RevenueReport, Service, DEFAULT_INVOICE_PREFIX, DEFAULT_TAX_RATE,
};
use crate::db::schema::Collection;
use crate::db::{store, ClinicStore};

const INVOICE_COUNTER_LOCK: &str = "invoice_counter";
const DEFAULT_PAYMENT_TERMS_DAYS: f64 = 30.0;

async fn items_of(conn: &mut SqliteConnection, invoice_id: i64) -> StoreResult<Vec<InvoiceItem>> {
    let def = Collection::InvoiceItems
        .index("invoiceId")
        .ok_or_else(|| StoreError::validation("Unknown index 'invoiceId'"))?;
    store::fetch_by_index(conn, Collection::InvoiceItems, def, &Value::from(invoice_id))
        .await?
        .into_iter()
        .map(from_document)
        .collect()
}

async fn invoice_number_taken(conn: &mut SqliteConnection, number: &str) -> StoreResult<bool> {
    let def = Collection::Invoices
        .index("invoiceNumber")
        .ok_or_else(|| StoreError::validation("Unknown index 'invoiceNumber'"))?;
    Ok(!store::fetch_by_index(conn, Collection::Invoices, def, &Value::from(number))
        .await?
        .is_empty())
}

/// Next free invoice number; persists the advanced counter
async fn next_invoice_number(conn: &mut SqliteConnection) -> StoreResult<String> {
    let prefix = text_setting(&mut *conn, "invoicePrefix", DEFAULT_INVOICE_PREFIX).await?;
    let mut counter = number_setting(&mut *conn, "invoiceCounter", 0.0).await? as i64;

    let number = loop {
        counter += 1;
        let candidate = format_invoice_number(&prefix, counter);
        if !invoice_number_taken(&mut *conn, &candidate).await? {
            break candidate;
        }
    };
    store_setting_value(conn, "invoiceCounter", &Value::from(counter)).await?;
    Ok(number)
}

impl ClinicStore {
    /// Bills a patient.
    ///
    /// subtotal is the sum of price times quantity, tax is taken from the
    /// `taxRate` setting, the due date defaults to `paymentTermsDays` out.
    /// Items referencing a service take its name as their description.
    pub async fn create_invoice(&self, request: NewInvoice, actor: Actor) -> StoreResult<InvoiceWithItems> {
        if request.items.is_empty() {
            return Err(StoreError::validation("An invoice needs at least one item"));
        }
        for item in &request.items {
            if !item.price.is_finite() || item.price < 0.0 {
                return Err(StoreError::validation("Item prices must be zero or more"));
            }
            if item.quantity <= 0 {
                return Err(StoreError::validation("Item quantities must be positive"));
            }
        }

        let _guard = self.locks.lock(INVOICE_COUNTER_LOCK).await;
        let mut tx = self.pool.begin().await?;

        store::fetch_as::<Patient>(&mut *tx, Collection::Patients, &RecordKey::Int(request.patient_id))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("Patient {} not found", request.patient_id)))?;

        let mut descriptions = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let service_name = match item.service_id {
                Some(service_id) => Some(
                    store::fetch_as::<Service>(&mut *tx, Collection::Services, &RecordKey::Int(service_id))
                        .await?
                        .ok_or_else(|| StoreError::not_found(format!("Service {} not found", service_id)))?
                        .name,
                ),
                None => None,
            };
            descriptions.push(
                item.description
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .or(service_name)
                    .unwrap_or_else(|| "Item".to_string()),
            );
        }

        let now = Utc::now();
        let tax_rate = number_setting(&mut *tx, "taxRate", DEFAULT_TAX_RATE).await?;
        let totals = compute_totals(&request.items, tax_rate);
        let due_date = match request.due_date {
            Some(due) => due,
            None => {
                let days = number_setting(&mut *tx, "paymentTermsDays", DEFAULT_PAYMENT_TERMS_DAYS).await?;
                checked_add_days(now, days)?
            }
        };
        let invoice_number = next_invoice_number(&mut *tx).await?;

        let invoice = Invoice {
            id: None,
            invoice_number,
            patient_id: request.patient_id,
            appointment_id: request.appointment_id,
            date: now,
            due_date: Some(due_date),
            subtotal: totals.subtotal,
            tax_rate,
            tax_amount: totals.tax_amount,
            total_amount: totals.total_amount,
            status: InvoiceStatus::Pending,
            payment_method: None,
            paid_at: None,
            notes: request.notes.clone(),
        };
        let stored = store::add_record(&mut *tx, Collection::Invoices, to_document(&invoice)?, actor).await?;
        let invoice: Invoice = from_document(stored)?;
        let invoice_id = invoice.id.unwrap_or_default();

        let mut items = Vec::with_capacity(request.items.len());
        for (input, description) in request.items.iter().zip(descriptions) {
            let item = InvoiceItem {
                id: None,
                invoice_id,
                service_id: input.service_id,
                description,
                price: input.price,
                quantity: input.quantity,
                total: round_currency(input.price * input.quantity as f64),
            };
            let stored = store::add_record(&mut *tx, Collection::InvoiceItems, to_document(&item)?, actor).await?;
            items.push(from_document(stored)?);
        }
        tx.commit().await?;

        tracing::info!(
            invoice_id = invoice_id,
            invoice_number = %invoice.invoice_number,
            total = invoice.total_amount,
            "Invoice created"
        );
        Ok(InvoiceWithItems { invoice, items })
    }

    pub async fn invoice_with_items(&self, id: i64) -> StoreResult<Option<InvoiceWithItems>> {
        let mut conn = self.pool.acquire().await?;
        let invoice: Option<Invoice> =
            store::fetch_as(&mut *conn, Collection::Invoices, &RecordKey::Int(id)).await?;
        match invoice {
            Some(invoice) => {
                let items = items_of(&mut *conn, id).await?;
                Ok(Some(InvoiceWithItems { invoice, items }))
            }
            None => Ok(None),
        }
    }

    /// Records payment. Paid or cancelled invoices are refused with `Conflict`.
    pub async fn mark_invoice_paid(
        &self,
        id: i64,
        payment_method: Option<String>,
        actor: Actor,
    ) -> StoreResult<Invoice> {
        let key = RecordKey::Int(id);
        let mut tx = self.pool.begin().await?;
        let mut invoice: Invoice = store::require_as(&mut *tx, Collection::Invoices, &key).await?;

        match invoice.status {
            InvoiceStatus::Paid => {
                return Err(StoreError::conflict(format!(
                    "Invoice {} is already paid",
                    invoice.invoice_number
                )))
            }
            InvoiceStatus::Cancelled => {
                return Err(StoreError::conflict(format!(
                    "Invoice {} was cancelled",
                    invoice.invoice_number
                )))
            }
            InvoiceStatus::Pending | InvoiceStatus::Overdue => {}
        }

        invoice.status = InvoiceStatus::Paid;
        invoice.paid_at = Some(Utc::now());
        invoice.payment_method = payment_method.filter(|m| !m.trim().is_empty());
        store::update_record(&mut *tx, Collection::Invoices, &key, to_document(&invoice)?, actor).await?;
        tx.commit().await?;

        tracing::info!(invoice_id = id, method = ?invoice.payment_method, "Invoice paid");
        Ok(invoice)
    }

    /// Revenue from paid invoices dated within `[from, to]`
    pub async fn revenue_report(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> StoreResult<RevenueReport> {
        let mut conn = self.pool.acquire().await?;
        let invoices: Vec<Invoice> = ListQuery::new()
            .filter("status", InvoiceStatus::Paid.as_str())
            .apply(store::fetch_all(&mut *conn, Collection::Invoices).await?)
            .into_iter()
            .map(from_document::<Invoice>)
            .collect::<StoreResult<Vec<_>>>()?
            .into_iter()
            .filter(|i| from.map(|f| i.date >= f).unwrap_or(true))
            .filter(|i| to.map(|t| i.date <= t).unwrap_or(true))
            .collect();

        let services: HashMap<i64, Service> = store::fetch_all(&mut *conn, Collection::Services)
            .await?
            .into_iter()
            .map(from_document::<Service>)
            .collect::<StoreResult<Vec<_>>>()?
            .into_iter()
            .filter_map(|s| s.id.map(|id| (id, s)))
            .collect();

        let mut report = RevenueReport {
            from,
            to,
            invoice_count: invoices.len(),
            ..Default::default()
        };

        for invoice in &invoices {
            report.total_revenue += invoice.total_amount;
            *report
                .daily
                .entry(invoice.date.format("%Y-%m-%d").to_string())
                .or_default() += invoice.total_amount;
            *report
                .by_payment_method
                .entry(
                    invoice
                        .payment_method
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                )
                .or_default() += invoice.total_amount;

            let Some(invoice_id) = invoice.id else {
                continue;
            };
            for item in items_of(&mut *conn, invoice_id).await? {
                let category = item
                    .service_id
                    .and_then(|id| services.get(&id))
                    .and_then(|s| s.category.clone())
                    .unwrap_or_else(|| "uncategorized".to_string());
                *report.by_category.entry(category).or_default() += item.total;
            }
        }

        report.total_revenue = round_currency(report.total_revenue);
        if report.invoice_count > 0 {
            report.average_invoice = round_currency(report.total_revenue / report.invoice_count as f64);
        }
        for amount in report
            .daily
            .values_mut()
            .chain(report.by_category.values_mut())
            .chain(report.by_payment_method.values_mut())
        {
            *amount = round_currency(*amount);
        }
        Ok(report)
    }

    /// Moves pending invoices past their due date to `overdue` and, when
    /// `overdueInvoiceAlerts` is on, tells every admin once per invoice.
    pub async fn flag_overdue_invoices(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let invoices: Vec<Invoice> = store::fetch_all(&mut *tx, Collection::Invoices)
            .await?
            .into_iter()
            .map(from_document)
            .collect::<StoreResult<_>>()?;
        let alerts = bool_setting(&mut *tx, "overdueInvoiceAlerts", true).await?;
        let admins = if alerts { active_admins(&mut *tx).await? } else { Vec::new() };

        let mut flagged = 0;
        for mut invoice in invoices.into_iter().filter(|i| i.is_overdue_at(now)) {
            let Some(invoice_id) = invoice.id else {
                continue;
            };
            invoice.status = InvoiceStatus::Overdue;
            store::update_record(
                &mut *tx,
                Collection::Invoices,
                &RecordKey::Int(invoice_id),
                to_document(&invoice)?,
                Actor::System,
            )
            .await?;
            flagged += 1;

            for admin_id in admins.iter().filter_map(|a| a.id) {
                if notification_exists(&mut *tx, kinds::OVERDUE_INVOICE, invoice_id, Some(admin_id), false).await? {
                    continue;
                }
                let alert = Notification::new(
                    admin_id,
                    kinds::OVERDUE_INVOICE,
                    "Overdue invoice",
                    format!(
                        "{} ({:.2}) is past due",
                        invoice.invoice_number, invoice.total_amount
                    ),
                )
                .with_priority(NotificationPriority::High)
                .related_to(invoice_id);
                insert_notification(&mut *tx, &alert, Actor::System).await?;
            }
        }
        tx.commit().await?;

        if flagged > 0 {
            tracing::info!(count = flagged, "Invoices flagged overdue");
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::db::models::InvoiceItemInput;
    use crate::db::test_support::test_store;
    use serde_json::json;

    fn line(price: f64, quantity: i64, service_id: Option<i64>) -> InvoiceItemInput {
        InvoiceItemInput {
            service_id,
            description: None,
            price,
            quantity,
        }
    }

    fn bill(patient_id: i64, items: Vec<InvoiceItemInput>) -> NewInvoice {
        NewInvoice {
            patient_id,
            appointment_id: None,
            due_date: None,
            notes: None,
            items,
        }
    }

    async fn patient(store: &ClinicStore) -> i64 {
        store
            .add_patient(Patient::new("Kojo"), Actor::User(1))
            .await
            .unwrap()
            .id
            .unwrap()
    }

    #[tokio::test]
    async fn test_invoice_totals_and_number() {
        let (store, _dir) = test_store().await;
        let pid = patient(&store).await;

        let created = store
            .create_invoice(bill(pid, vec![line(100.0, 1, None), line(50.0, 1, None)]), Actor::User(1))
            .await
            .unwrap();
        assert_eq!(created.invoice.subtotal, 150.0);
        assert_eq!(created.invoice.tax_amount, 22.5);
        assert_eq!(created.invoice.total_amount, 172.5);
        assert_eq!(created.invoice.invoice_number, "INV-000001");
        assert_eq!(created.invoice.status, InvoiceStatus::Pending);
        assert!(created.invoice.due_date.unwrap() > Utc::now() + Duration::days(29));
        assert_eq!(created.items.len(), 2);

        let second = store
            .create_invoice(bill(pid, vec![line(10.0, 2, None)]), Actor::User(1))
            .await
            .unwrap();
        assert_eq!(second.invoice.invoice_number, "INV-000002");
        assert_eq!(
            store.setting_value("invoiceCounter").await.unwrap().and_then(|v| v.as_f64()),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_invoice_rejects_bad_items() {
        let (store, _dir) = test_store().await;
        let pid = patient(&store).await;
        for items in [vec![], vec![line(-1.0, 1, None)], vec![line(5.0, 0, None)]] {
            let err = store.create_invoice(bill(pid, items), Actor::User(1)).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }
        let err = store
            .create_invoice(bill(pid + 1, vec![line(5.0, 1, None)]), Actor::User(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(store.count(Collection::Invoices).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_invoices_get_distinct_numbers() {
        let (store, _dir) = test_store().await;
        let pid = patient(&store).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_invoice(bill(pid, vec![line(1.0, 1, None)]), Actor::User(1))
                    .await
                    .unwrap()
                    .invoice
                    .invoice_number
            }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 8);
    }

    #[tokio::test]
    async fn test_pay_and_revenue_report() {
        let (store, _dir) = test_store().await;
        let pid = patient(&store).await;
        let consult = store
            .add(
                Collection::Services,
                to_document(&json!({"name": "Consultation", "category": "consultation", "price": 100.0}))
                    .unwrap(),
                Actor::User(1),
            )
            .await
            .unwrap()["id"]
            .as_i64()
            .unwrap();

        let paid = store
            .create_invoice(bill(pid, vec![line(100.0, 1, Some(consult)), line(50.0, 1, None)]), Actor::User(1))
            .await
            .unwrap();
        assert_eq!(paid.items[0].description, "Consultation");
        let unpaid = store
            .create_invoice(bill(pid, vec![line(999.0, 1, None)]), Actor::User(1))
            .await
            .unwrap();

        let paid_id = paid.invoice.id.unwrap();
        store
            .mark_invoice_paid(paid_id, Some("cash".to_string()), Actor::User(1))
            .await
            .unwrap();
        let err = store.mark_invoice_paid(paid_id, None, Actor::User(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let report = store.revenue_report(None, None).await.unwrap();
        assert_eq!(report.invoice_count, 1);
        assert_eq!(report.total_revenue, 172.5);
        assert_eq!(report.average_invoice, 172.5);
        assert_eq!(report.by_payment_method["cash"], 172.5);
        assert_eq!(report.by_category["consultation"], 100.0);
        assert_eq!(report.by_category["uncategorized"], 50.0);
        assert_eq!(report.daily.values().sum::<f64>(), 172.5);

        let future = store
            .revenue_report(Some(Utc::now() + Duration::days(1)), None)
            .await
            .unwrap();
        assert_eq!(future.invoice_count, 0);
        assert!(unpaid.invoice.id.is_some());
    }

    #[tokio::test]
    async fn test_flag_overdue_invoices_notifies_admins_once() {
        let (store, _dir) = test_store().await;
        let pid = patient(&store).await;
        let mut request = bill(pid, vec![line(20.0, 1, None)]);
        request.due_date = Some(Utc::now() - Duration::days(2));
        let invoice = store.create_invoice(request, Actor::User(1)).await.unwrap();

        assert_eq!(store.flag_overdue_invoices(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.flag_overdue_invoices(Utc::now()).await.unwrap(), 0);

        let reloaded = store.invoice_with_items(invoice.invoice.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(reloaded.invoice.status, InvoiceStatus::Overdue);
        let alerts = store.unread_notifications(1).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, kinds::OVERDUE_INVOICE);

        // overdue invoices can still be paid
        store
            .mark_invoice_paid(invoice.invoice.id.unwrap(), Some("card".to_string()), Actor::User(1))
            .await
            .unwrap();
    }
}
