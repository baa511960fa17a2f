//! Shared fixtures for integration tests.
//!
//! Every test gets its own file-backed database; pooled in-memory SQLite
//! connections would each see a separate empty database.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

pub use convia_license::db::{self, AppState, DbPool, queries};
pub use convia_license::email::{EmailSendResult, EmailService, Notifier, NotifyError};
pub use convia_license::error::{AppError, LifecycleError, SignatureError, TokenError};
pub use convia_license::licensing::{
    MagicLinkEngine, Rejection, VerificationEngine, VerifyResult, WebhookAck, WebhookProcessor,
};
pub use convia_license::models::*;
pub use convia_license::plans::PlanTable;
pub use convia_license::signature;
pub use convia_license::token::{generate_token, hash_token};

pub const WEBHOOK_SECRET: &str = "pdl_ntfset_test_secret";
pub const ADMIN_KEY: &str = "admin-test-key";
pub const KEY_PREFIX: &str = "TEST";
pub const PORTAL_URL: &str = "https://convia.test/license/portal";
/// Far enough out that fixtures never expire during a test run
pub const PERIOD_END: &str = "2099-01-01T00:00:00Z";

pub struct TestDb {
    pub pool: DbPool,
    _dir: TempDir,
}

pub fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("licenses.db");
    let pool = db::init_pool(path.to_str().unwrap(), 12).expect("pool");
    db::init_db(&pool.get().unwrap()).expect("schema");
    TestDb { pool, _dir: dir }
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Fixtures ============

pub fn create_test_license(pool: &DbPool, email: &str, plan: &str, allowed: i64) -> License {
    let conn = pool.get().unwrap();
    let customer = queries::find_or_create_customer(&conn, email).unwrap();
    queries::create_license(
        &conn,
        KEY_PREFIX,
        &CreateLicense {
            customer_id: customer.id,
            plan: plan.to_string(),
            allowed_containers: allowed,
            status: LicenseStatus::Active,
            expires_at: None,
            paddle_subscription_id: None,
            last_event_at: None,
        },
    )
    .unwrap()
}

pub fn set_expires_at(pool: &DbPool, license_id: i64, expires_at: i64) {
    pool.get()
        .unwrap()
        .execute(
            "UPDATE licenses SET expires_at = ?1 WHERE id = ?2",
            rusqlite::params![expires_at, license_id],
        )
        .unwrap();
}

pub fn binding_count(pool: &DbPool, license_id: i64) -> i64 {
    queries::count_bindings_for_license(&pool.get().unwrap(), license_id).unwrap()
}

pub fn license_by_id(pool: &DbPool, license_id: i64) -> License {
    queries::get_license_by_id(&pool.get().unwrap(), license_id)
        .unwrap()
        .expect("license exists")
}

/// Insert a magic token directly and return its plaintext.
pub fn issue_token(pool: &DbPool, customer_id: i64, expires_at: i64) -> String {
    let token = generate_token();
    queries::create_magic_token(&pool.get().unwrap(), customer_id, &hash_token(&token), expires_at)
        .unwrap();
    token
}

// ============ Notifiers ============

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub fn last_url(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, url)| url.clone())
    }
}

impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        to: &str,
        claim_url: &str,
        _expires_at: i64,
    ) -> Result<EmailSendResult, NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), claim_url.to_string()));
        Ok(EmailSendResult::Sent)
    }
}

#[derive(Clone, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    async fn send(
        &self,
        _to: &str,
        _claim_url: &str,
        _expires_at: i64,
    ) -> Result<EmailSendResult, NotifyError> {
        Err(NotifyError::Transport("connection refused".into()))
    }
}

/// Never completes a delivery.
#[derive(Clone, Default)]
pub struct HangingNotifier;

impl Notifier for HangingNotifier {
    async fn send(
        &self,
        _to: &str,
        _claim_url: &str,
        _expires_at: i64,
    ) -> Result<EmailSendResult, NotifyError> {
        std::future::pending().await
    }
}

pub fn token_from_url(url: &str) -> String {
    url.split("token=")
        .nth(1)
        .expect("claim url carries a token")
        .to_string()
}

// ============ Webhooks ============

pub fn webhook_processor(pool: &DbPool) -> WebhookProcessor {
    WebhookProcessor::new(
        pool.clone(),
        WEBHOOK_SECRET,
        Duration::from_secs(300),
        PlanTable::default(),
        KEY_PREFIX,
    )
}

pub fn sign_now(payload: &[u8]) -> String {
    signature::signature_header(payload, WEBHOOK_SECRET, now())
}

pub fn subscription_data(subscription_id: &str, email: &str, price_name: &str) -> Value {
    json!({
        "id": subscription_id,
        "status": "active",
        "customer_id": format!("ctm_{}", subscription_id),
        "customer": {
            "id": format!("ctm_{}", subscription_id),
            "email": email
        },
        "items": [{"price": {"id": "pri_01", "name": price_name}}],
        "current_billing_period": {
            "starts_at": "2024-05-01T00:00:00Z",
            "ends_at": PERIOD_END
        }
    })
}

pub fn event_payload(event_id: &str, event_type: &str, occurred_at: &str, data: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event_id": event_id,
        "event_type": event_type,
        "occurred_at": occurred_at,
        "notification_id": format!("ntf_{}", event_id),
        "data": data
    }))
    .unwrap()
}

/// Sign and deliver a payload through the processor.
pub fn deliver(processor: &WebhookProcessor, payload: &[u8]) -> Result<WebhookAck, AppError> {
    let header = sign_now(payload);
    processor.handle(payload, Some(&header))
}

pub fn webhook_log_statuses(pool: &DbPool, event_id: &str) -> Vec<WebhookLogStatus> {
    queries::list_webhook_logs_for_event(&pool.get().unwrap(), event_id)
        .unwrap()
        .into_iter()
        .map(|log| log.status)
        .collect()
}

// ============ HTTP ============

pub fn test_state(pool: &DbPool) -> AppState {
    AppState {
        db: pool.clone(),
        verifier: VerificationEngine::new(pool.clone()),
        magic_links: MagicLinkEngine::new(
            pool.clone(),
            EmailService::disabled(),
            PORTAL_URL,
            chrono::Duration::minutes(15),
        ),
        webhooks: webhook_processor(pool),
        admin_api_key: ADMIN_KEY.to_string(),
    }
}

pub fn test_app(pool: &DbPool) -> Router {
    convia_license::handlers::router(test_state(pool))
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    (status, json)
}
