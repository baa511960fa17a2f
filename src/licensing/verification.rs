use chrono::Utc;
use serde::Serialize;

use crate::db::{DbPool, queries};
use crate::error::{AppError, Result};

/// Why a license did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    NotFound,
    Inactive,
    Expired,
    ContainerLimitReached,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::NotFound => "license not found",
            Rejection::Inactive => "license inactive",
            Rejection::Expired => "license expired",
            Rejection::ContainerLimitReached => "container limit reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub license_id: i64,
    pub plan: String,
    pub allowed_containers: i64,
    /// Binding count after this call
    pub current_usage: i64,
    /// True when this call consumed a quota unit
    pub newly_bound: bool,
}

/// Rejections are ordinary outcomes, not errors. Only store failures and
/// bad input surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid(Verified),
    Invalid {
        reason: Rejection,
        allowed_containers: Option<i64>,
        current_usage: Option<i64>,
    },
}

impl VerifyResult {
    fn rejected(reason: Rejection) -> Self {
        VerifyResult::Invalid {
            reason,
            allowed_containers: None,
            current_usage: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid(_))
    }
}

#[derive(Clone)]
pub struct VerificationEngine {
    db: DbPool,
}

impl VerificationEngine {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Check a license and bind the calling `(machine_id, container_id)`.
    ///
    /// A pair that is already bound always verifies without consuming quota,
    /// even if the license is currently over quota after a downgrade. A new
    /// pair is bound only while usage is below `allowed_containers`. Bindings
    /// are never evicted here.
    pub fn verify(
        &self,
        license_key: &str,
        machine_id: &str,
        container_id: Option<&str>,
    ) -> Result<VerifyResult> {
        let license_key = license_key.trim();
        let machine_id = machine_id.trim();
        if license_key.is_empty() {
            return Err(AppError::BadRequest("license_key is required".into()));
        }
        if machine_id.is_empty() {
            return Err(AppError::BadRequest("machine_id is required".into()));
        }
        // "" and absent are the same container
        let container_id = container_id.map(str::trim).filter(|c| !c.is_empty());

        let mut conn = self.db.get()?;

        let Some(license) = queries::get_license_by_key(&conn, license_key)? else {
            tracing::info!("Verification for unknown license key");
            return Ok(VerifyResult::rejected(Rejection::NotFound));
        };

        if !license.status.is_active() {
            tracing::info!(
                license_id = license.id,
                status = license.status.as_ref(),
                "Verification for inactive license"
            );
            return Ok(VerifyResult::rejected(Rejection::Inactive));
        }

        if license.is_expired_at(Utc::now().timestamp()) {
            tracing::info!(license_id = license.id, "Verification for expired license");
            return Ok(VerifyResult::rejected(Rejection::Expired));
        }

        // Status and expiry are checked again under the write lock
        match queries::upsert_binding_atomic(&mut conn, license.id, machine_id, container_id) {
            Ok(acquisition) => {
                let current = acquisition.license();
                if acquisition.is_new() {
                    tracing::info!(
                        license_id = current.id,
                        binding_id = acquisition.binding().id,
                        machine_id = %machine_id,
                        container_id = ?container_id,
                        usage = acquisition.usage(),
                        allowed = current.allowed_containers,
                        "New machine binding"
                    );
                }
                Ok(VerifyResult::Valid(Verified {
                    license_id: current.id,
                    plan: current.plan.clone(),
                    allowed_containers: current.allowed_containers,
                    current_usage: acquisition.usage(),
                    newly_bound: acquisition.is_new(),
                }))
            }
            Err(AppError::LicenseInactive(status)) => {
                tracing::info!(
                    license_id = license.id,
                    status = %status,
                    "License deactivated mid-verification"
                );
                Ok(VerifyResult::rejected(Rejection::Inactive))
            }
            Err(AppError::LicenseExpired) => {
                tracing::info!(license_id = license.id, "License expired mid-verification");
                Ok(VerifyResult::rejected(Rejection::Expired))
            }
            Err(AppError::QuotaExceeded { allowed, current }) => {
                tracing::info!(
                    license_id = license.id,
                    machine_id = %machine_id,
                    allowed,
                    current,
                    "Container limit reached"
                );
                Ok(VerifyResult::Invalid {
                    reason: Rejection::ContainerLimitReached,
                    allowed_containers: Some(allowed),
                    current_usage: Some(current),
                })
            }
            Err(e) => Err(e),
        }
    }
}
