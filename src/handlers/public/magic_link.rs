use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::{Json, Query};
use crate::models::LicenseSummary;

#[derive(Debug, Deserialize)]
pub struct MagicLinkRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct MagicLinkRequestResponse {
    pub success: bool,
    pub message: &'static str,
}

/// Same answer whether or not the address owns licenses.
pub async fn request_magic_link(
    State(state): State<AppState>,
    Json(request): Json<MagicLinkRequest>,
) -> Result<Json<MagicLinkRequestResponse>> {
    state.magic_links.request_link(&request.email).await?;
    Ok(Json(MagicLinkRequestResponse {
        success: true,
        message: "If this address has licenses, a link to view them is on its way",
    }))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MagicLinkVerifyResponse {
    pub valid: bool,
    pub email: String,
}

pub async fn verify_magic_link(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MagicLinkVerifyResponse>> {
    let customer = state.magic_links.verify_token(&query.token)?;
    Ok(Json(MagicLinkVerifyResponse {
        valid: true,
        email: customer.email,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub licenses: Vec<LicenseSummary>,
}

pub async fn claim_licenses(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>> {
    let licenses = state.magic_links.claim(&request.token)?;
    Ok(Json(ClaimResponse { licenses }))
}
