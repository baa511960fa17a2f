//! Operator actions on a single license.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{License, LicenseStatus, MachineBinding};

#[derive(Debug, Clone, Serialize)]
pub struct LicenseUsage {
    pub license: License,
    pub current_usage: i64,
    pub bindings: Vec<MachineBinding>,
}

fn require_license(conn: &Connection, license_id: i64) -> Result<License> {
    queries::get_license_by_id(conn, license_id)?
        .ok_or_else(|| AppError::NotFound("License not found".into()))
}

/// Drop every binding so the customer can re-bind from scratch.
pub fn reset_bindings(conn: &Connection, license_id: i64) -> Result<usize> {
    require_license(conn, license_id)?;
    let removed = queries::reset_bindings_for_license(conn, license_id)?;
    tracing::info!(license_id, removed, "Machine bindings reset");
    Ok(removed)
}

pub fn license_usage(conn: &Connection, license_id: i64) -> Result<LicenseUsage> {
    let license = require_license(conn, license_id)?;
    let bindings = queries::list_bindings_for_license(conn, license_id)?;
    Ok(LicenseUsage {
        current_usage: bindings.len() as i64,
        license,
        bindings,
    })
}

/// Manual status override. Bindings are left untouched.
pub fn set_status(conn: &Connection, license_id: i64, status: LicenseStatus) -> Result<License> {
    if !queries::set_license_status(conn, license_id, status)? {
        return Err(AppError::NotFound("License not found".into()));
    }
    tracing::info!(license_id, status = status.as_ref(), "License status set by operator");
    require_license(conn, license_id)
}
