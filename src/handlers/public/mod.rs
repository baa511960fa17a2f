mod magic_link;
mod verify;

pub use magic_link::*;
pub use verify::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/license/verify", post(verify_license))
        .route("/api/license/request-magic-link", post(request_magic_link))
        .route("/api/license/magic-link/verify", get(verify_magic_link))
        .route("/api/license/claim", post(claim_licenses))
}
