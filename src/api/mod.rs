mod appointments;
mod audit;
pub mod auth;
mod backups;
mod billing;
mod collections;
pub mod error;
mod notifications;
mod patients;
mod prescriptions;
mod settings;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Auth routes (public)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/validate", get(auth::validate))
        .route("/logout", post(auth::logout));

    // Protected API routes
    let api_routes = Router::new()
        // Session owner
        .route("/auth/me", get(auth::me))
        .route("/auth/password", put(auth::change_password))
        // Generic collections
        .route(
            "/collections/:collection",
            get(collections::list_records).post(collections::create_record),
        )
        .route(
            "/collections/:collection/search",
            get(collections::search_records),
        )
        .route(
            "/collections/:collection/index/:index/:value",
            get(collections::records_by_index),
        )
        .route(
            "/collections/:collection/:id",
            get(collections::get_record)
                .put(collections::update_record)
                .delete(collections::delete_record),
        )
        // Appointments
        .route("/appointments", post(appointments::book_appointment))
        .route("/appointments/check", post(appointments::check_conflict))
        .route("/appointments/stats", get(appointments::conflict_stats))
        .route("/appointments/day/:date", get(appointments::appointments_for_day))
        .route("/appointments/:id/status", put(appointments::update_status))
        // Patients and records
        .route("/patients", post(patients::register_patient))
        .route("/patients/search", get(patients::search_patients))
        .route("/patients/:id/history", get(patients::patient_history))
        .route("/medical-records", post(patients::add_medical_record))
        // Prescriptions
        .route("/prescriptions", post(prescriptions::create_prescription))
        .route("/prescriptions/:id", get(prescriptions::get_prescription))
        .route("/prescriptions/:id/refill", post(prescriptions::refill_prescription))
        // Billing
        .route("/invoices", post(billing::create_invoice))
        .route("/invoices/:id", get(billing::get_invoice))
        .route("/invoices/:id/pay", post(billing::pay_invoice))
        .route("/reports/revenue", get(billing::revenue_report))
        // Settings
        .route(
            "/settings",
            get(settings::list_settings).put(settings::update_settings),
        )
        .route(
            "/settings/:key",
            get(settings::get_setting).put(settings::update_setting),
        )
        // Backups and export
        .route(
            "/backups",
            get(backups::list_backups).post(backups::create_backup),
        )
        .route("/backups/:id", get(backups::get_backup))
        .route("/export", get(backups::export_data))
        // Notifications
        .route("/notifications", get(notifications::list_unread))
        .route("/notifications/:id/read", post(notifications::mark_read))
        // Audit
        .route("/audit-logs", get(audit::list_logs))
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_support::test_store;
    use crate::db::{Actor, NewUser, Patient, Role};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const ADMIN_PASSWORD: &str = "ChangeMe-2024!";

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn login_as(router: &Router, username: &str, password: &str) -> String {
        let (status, body) = send(
            router,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": username, "password": password })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn login(router: &Router) -> String {
        login_as(router, "admin", ADMIN_PASSWORD).await
    }

    async fn add_doctor(store: &crate::db::ClinicStore, username: &str) -> i64 {
        store
            .create_user(
                NewUser {
                    username: username.to_string(),
                    password: "Doctor2024x".to_string(),
                    email: format!("{}@clinic.local", username),
                    role: Role::Doctor,
                    full_name: format!("Dr {}", username),
                },
                Actor::System,
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_health() {
        let (store, _dir) = test_store().await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_validate_logout() {
        let (store, _dir) = test_store().await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));
        let token = login(&router).await;

        let (status, user) = send(&router, Method::GET, "/api/auth/validate", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["username"], "admin");
        assert!(user.get("passwordHash").is_none());

        let (_, body) = send(&router, Method::POST, "/api/auth/logout", Some(&token), None).await;
        assert_eq!(body["loggedOut"], true);

        let (status, body) = send(&router, Method::GET, "/api/auth/validate", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let (store, _dir) = test_store().await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));

        let (status, body) = send(&router, Method::GET, "/api/collections/patients", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_sessions_are_not_exposed() {
        let (store, _dir) = test_store().await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));
        let token = login(&router).await;

        let (status, _) = send(&router, Method::GET, "/api/collections/sessions", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, users) = send(&router, Method::GET, "/api/collections/users", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(users[0].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_doctor_cannot_reach_admin_collections() {
        let (store, _dir) = test_store().await;
        add_doctor(&store, "grey").await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));
        let token = login_as(&router, "grey", "Doctor2024x").await;

        for uri in [
            "/api/collections/audit_logs",
            "/api/collections/backups",
            "/api/collections/auditLogs/search?q=login&fields=action",
        ] {
            let (status, body) = send(&router, Method::GET, uri, Some(&token), None).await;
            assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
            assert_eq!(body["error"]["code"], "forbidden");
        }

        let (status, _) = send(
            &router,
            Method::PUT,
            "/api/collections/settings/taxRate",
            Some(&token),
            Some(json!({ "value": 99, "category": "billing", "type": "number" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &router,
            Method::POST,
            "/api/collections/settings",
            Some(&token),
            Some(json!({ "key": "backdoor", "value": true, "category": "system", "type": "boolean" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // settings stay readable
        let (status, _) = send(&router, Method::GET, "/api/collections/settings/taxRate", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_doctor_cannot_promote_themselves() {
        let (store, _dir) = test_store().await;
        let id = add_doctor(&store, "cuddy").await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));
        let token = login_as(&router, "cuddy", "Doctor2024x").await;
        let uri = format!("/api/collections/users/{}", id);

        let (status, mut me) = send(&router, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        me["role"] = json!("admin");
        let (status, body) = send(&router, Method::PUT, &uri, Some(&token), Some(me.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");

        // profile edits without the protected fields keep them as stored
        let mut edit = me.clone();
        let fields = edit.as_object_mut().unwrap();
        fields.remove("role");
        fields.remove("isActive");
        fields.insert("fullName".to_string(), json!("Dr Lisa Cuddy"));
        let (status, updated) = send(&router, Method::PUT, &uri, Some(&token), Some(edit)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["role"], "doctor");
        assert_eq!(updated["isActive"], true);
        assert_eq!(updated["fullName"], "Dr Lisa Cuddy");

        let (status, _) = send(&router, Method::PUT, "/api/collections/users/1", Some(&token), Some(me)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, user) = send(&router, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(user["role"], "doctor");
    }

    #[tokio::test]
    async fn test_double_booking_returns_conflict_envelope() {
        let (store, _dir) = test_store().await;
        let doctor = add_doctor(&store, "house").await;
        let first = store.add_patient(Patient::new("Ama Mensah"), Actor::System).await.unwrap();
        let second = store.add_patient(Patient::new("Kofi Boateng"), Actor::System).await.unwrap();
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));
        let token = login(&router).await;

        let booking = |patient_id: Option<i64>, date: &str| {
            json!({
                "doctorId": doctor,
                "patientId": patient_id,
                "date": date,
                "duration": 30,
            })
        };

        let (status, created) = send(
            &router,
            Method::POST,
            "/api/appointments",
            Some(&token),
            Some(booking(first.id, "2030-03-04T09:00:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "scheduled");

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/appointments",
            Some(&token),
            Some(booking(second.id, "2030-03-04T09:15:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "conflict");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Doctor already has an appointment"));

        let (status, body) = send(
            &router,
            Method::POST,
            "/api/appointments/check",
            Some(&token),
            Some(booking(second.id, "2030-03-04T09:30:00Z")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hasConflict"], false);
    }

    #[tokio::test]
    async fn test_settings_update_requires_known_key() {
        let (store, _dir) = test_store().await;
        let router = create_router(Arc::new(AppState::new(Config::default(), store)));
        let token = login(&router).await;

        let (status, setting) = send(
            &router,
            Method::PUT,
            "/api/settings/taxRate",
            Some(&token),
            Some(json!({ "value": 12.5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(setting["value"], 12.5);

        let (status, _) = send(
            &router,
            Method::PUT,
            "/api/settings/noSuchKey",
            Some(&token),
            Some(json!({ "value": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
