//! Public and admin routes over HTTP.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::json;

mod common;
use common::*;

fn admin_request(method: &str, uri: &str, key: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-Admin-API-Key", key);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn bind(pool: &DbPool, license: &License, machine: &str) {
    assert!(
        VerificationEngine::new(pool.clone())
            .verify(&license.license_key, machine, None)
            .unwrap()
            .is_valid()
    );
}

#[tokio::test]
async fn test_health() {
    let db = test_db();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(test_app(&db.pool), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ============ Verify ============

#[tokio::test]
async fn test_verify_endpoint_valid() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 5);

    let (status, body) = send(
        test_app(&db.pool),
        json_request(
            "POST",
            "/api/license/verify",
            json!({"license_key": &license.license_key, "machine_id": "m1", "container_id": "c1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["license_id"], license.id);
    assert_eq!(body["plan"], "pro");
    assert_eq!(body["allowed_containers"], 5);
    assert_eq!(body["current_usage"], 1);
}

#[tokio::test]
async fn test_verify_endpoint_limit_reached() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    bind(&db.pool, &license, "m1");

    let (status, body) = send(
        test_app(&db.pool),
        json_request(
            "POST",
            "/api/license/verify",
            json!({"license_key": &license.license_key, "machine_id": "m2"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["message"], "container limit reached");
    assert_eq!(body["reason"], "container_limit_reached");
    assert_eq!(body["allowed_containers"], 1);
    assert_eq!(body["current_usage"], 1);
    assert!(body.get("license_id").is_none());
}

#[tokio::test]
async fn test_verify_endpoint_unknown_key() {
    let db = test_db();

    let (status, body) = send(
        test_app(&db.pool),
        json_request(
            "POST",
            "/api/license/verify",
            json!({"license_key": "TEST-AAAA-BBBB-CCCC-DDDD", "machine_id": "m1"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["message"], "license not found");
}

#[tokio::test]
async fn test_verify_endpoint_missing_field() {
    let db = test_db();

    let (status, body) = send(
        test_app(&db.pool),
        json_request("POST", "/api/license/verify", json!({"license_key": "x"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

// ============ Magic links ============

#[tokio::test]
async fn test_request_magic_link_generic_ack() {
    let db = test_db();
    create_test_license(&db.pool, "buyer@example.com", "basic", 1);

    let (known_status, known) = send(
        test_app(&db.pool),
        json_request(
            "POST",
            "/api/license/request-magic-link",
            json!({"email": "buyer@example.com"}),
        ),
    )
    .await;
    let (unknown_status, unknown) = send(
        test_app(&db.pool),
        json_request(
            "POST",
            "/api/license/request-magic-link",
            json!({"email": "stranger@example.com"}),
        ),
    )
    .await;

    assert_eq!(known_status, StatusCode::OK);
    assert_eq!(unknown_status, StatusCode::OK);
    assert_eq!(known, unknown);
    assert!(known.get("token").is_none());
}

#[tokio::test]
async fn test_magic_link_verify_then_claim() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 5);
    let token = issue_token(&db.pool, license.customer_id, now() + 900);

    let verify = Request::builder()
        .uri(format!("/api/license/magic-link/verify?token={}", token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(test_app(&db.pool), verify).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["email"], "buyer@example.com");

    let (status, body) = send(
        test_app(&db.pool),
        json_request("POST", "/api/license/claim", json!({"token": &token})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let licenses = body["licenses"].as_array().unwrap();
    assert_eq!(licenses.len(), 1);
    assert_eq!(licenses[0]["license_key"], license.license_key);
    assert_eq!(licenses[0]["status"], "active");
    assert_eq!(licenses[0]["current_usage"], 0);

    let (status, body) = send(
        test_app(&db.pool),
        json_request("POST", "/api/license/claim", json!({"token": &token})),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "TOKEN_ALREADY_USED");
}

#[tokio::test]
async fn test_claim_expired_and_unknown_tokens() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 5);
    let expired = issue_token(&db.pool, license.customer_id, now() - 5);

    let (status, body) = send(
        test_app(&db.pool),
        json_request("POST", "/api/license/claim", json!({"token": expired})),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "TOKEN_EXPIRED");

    let (status, body) = send(
        test_app(&db.pool),
        json_request("POST", "/api/license/claim", json!({"token": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TOKEN_NOT_FOUND");
}

// ============ Admin ============

#[tokio::test]
async fn test_admin_requires_key() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    let uri = format!("/api/admin/licenses/{}/reset-machines", license.id);

    let (status, body) = send(test_app(&db.pool), admin_request("POST", &uri, None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(
        test_app(&db.pool),
        admin_request("POST", &uri, Some("wrong-key"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_admin_reset_machines() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 2);
    bind(&db.pool, &license, "m1");
    bind(&db.pool, &license, "m2");

    let (status, body) = send(
        test_app(&db.pool),
        admin_request(
            "POST",
            &format!("/api/admin/licenses/{}/reset-machines", license.id),
            Some(ADMIN_KEY),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed_count"], 2);
    assert_eq!(body["license_id"], license.id);
    assert_eq!(binding_count(&db.pool, license.id), 0);
}

#[tokio::test]
async fn test_admin_unknown_license_not_found() {
    let db = test_db();

    let (status, body) = send(
        test_app(&db.pool),
        admin_request("POST", "/api/admin/licenses/424242/reset-machines", Some(ADMIN_KEY), None),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_admin_usage() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "pro", 5);
    bind(&db.pool, &license, "m1");
    bind(&db.pool, &license, "m2");

    let (status, body) = send(
        test_app(&db.pool),
        admin_request(
            "GET",
            &format!("/api/admin/licenses/{}/usage", license.id),
            Some(ADMIN_KEY),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_usage"], 2);
    assert_eq!(body["license"]["license_key"], license.license_key);
    let machines: Vec<&str> = body["bindings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["machine_id"].as_str().unwrap())
        .collect();
    assert_eq!(machines, vec!["m1", "m2"]);
}

#[tokio::test]
async fn test_admin_status_change_blocks_verification() {
    let db = test_db();
    let license = create_test_license(&db.pool, "buyer@example.com", "basic", 1);
    bind(&db.pool, &license, "m1");

    let (status, body) = send(
        test_app(&db.pool),
        admin_request(
            "PUT",
            &format!("/api/admin/licenses/{}/status", license.id),
            Some(ADMIN_KEY),
            Some(json!({"status": "suspended"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "suspended");

    let (_, body) = send(
        test_app(&db.pool),
        json_request(
            "POST",
            "/api/license/verify",
            json!({"license_key": &license.license_key, "machine_id": "m1"}),
        ),
    )
    .await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["message"], "license inactive");
    assert_eq!(binding_count(&db.pool, license.id), 1);
}

#[tokio::test]
async fn test_admin_cors_preflight_allows_put_and_key_header() {
    use tower::ServiceExt;

    let db = test_db();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/admin/licenses/1/status")
        .header("origin", "https://admin.convia.test")
        .header("access-control-request-method", "PUT")
        .header("access-control-request-headers", "x-admin-api-key,content-type")
        .body(Body::empty())
        .unwrap();

    let response = test_app(&db.pool).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase()
    };
    assert!(header("access-control-allow-methods").contains("put"));
    assert!(header("access-control-allow-headers").contains("x-admin-api-key"));
}
