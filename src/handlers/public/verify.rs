use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::licensing::{Rejection, VerifyResult};

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub license_key: String,
    pub machine_id: String,
    #[serde(default)]
    pub container_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_containers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<i64>,
}

impl From<VerifyResult> for VerifyResponse {
    fn from(result: VerifyResult) -> Self {
        match result {
            VerifyResult::Valid(verified) => VerifyResponse {
                valid: true,
                message: "license verified".to_string(),
                reason: None,
                license_id: Some(verified.license_id),
                plan: Some(verified.plan),
                allowed_containers: Some(verified.allowed_containers),
                current_usage: Some(verified.current_usage),
            },
            VerifyResult::Invalid {
                reason,
                allowed_containers,
                current_usage,
            } => VerifyResponse {
                valid: false,
                message: reason.message().to_string(),
                reason: Some(reason),
                license_id: None,
                plan: None,
                allowed_containers,
                current_usage,
            },
        }
    }
}

/// Rejections answer 200 with `valid: false`; only malformed requests and
/// store failures are HTTP errors.
pub async fn verify_license(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>> {
    let result = state.verifier.verify(
        &request.license_key,
        &request.machine_id,
        request.container_id.as_deref(),
    )?;
    Ok(Json(result.into()))
}
