use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::licensing::admin::{self, LicenseUsage};
use crate::models::{License, LicenseStatus};

pub async fn get_license_usage(
    State(state): State<AppState>,
    Path(license_id): Path<i64>,
) -> Result<Json<LicenseUsage>> {
    let conn = state.db.get()?;
    Ok(Json(admin::license_usage(&conn, license_id)?))
}

#[derive(Debug, Serialize)]
pub struct ResetMachinesResponse {
    pub license_id: i64,
    pub removed_count: usize,
}

pub async fn reset_machines(
    State(state): State<AppState>,
    Path(license_id): Path<i64>,
) -> Result<Json<ResetMachinesResponse>> {
    let conn = state.db.get()?;
    let removed_count = admin::reset_bindings(&conn, license_id)?;
    Ok(Json(ResetMachinesResponse {
        license_id,
        removed_count,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: LicenseStatus,
}

pub async fn update_license_status(
    State(state): State<AppState>,
    Path(license_id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<License>> {
    let conn = state.db.get()?;
    Ok(Json(admin::set_status(&conn, license_id, request.status)?))
}
