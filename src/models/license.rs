use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Suspended,
    Cancelled,
    Expired,
}

impl LicenseStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, LicenseStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: i64,
    pub license_key: String,
    pub customer_id: i64,
    pub plan: String,
    /// Max distinct (machine_id, container_id) bindings. Always >= 1.
    pub allowed_containers: i64,
    pub status: LicenseStatus,
    pub created_at: i64,
    pub updated_at: i64,
    /// None = non-expiring
    pub expires_at: Option<i64>,
    pub paddle_subscription_id: Option<String>,
    /// occurred_at of the last lifecycle event applied to this license
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<i64>,
}

impl License {
    /// Expiry is evaluated lazily: a past `expires_at` wins over `status`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone)]
pub struct CreateLicense {
    pub customer_id: i64,
    pub plan: String,
    pub allowed_containers: i64,
    pub status: LicenseStatus,
    pub expires_at: Option<i64>,
    pub paddle_subscription_id: Option<String>,
    pub last_event_at: Option<i64>,
}

/// License as shown to its owner after a magic-link claim.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseSummary {
    pub id: i64,
    pub license_key: String,
    pub plan: String,
    pub status: LicenseStatus,
    pub allowed_containers: i64,
    pub current_usage: i64,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl LicenseSummary {
    pub fn new(license: License, current_usage: i64) -> Self {
        Self {
            id: license.id,
            license_key: license.license_key,
            plan: license.plan,
            status: license.status,
            allowed_containers: license.allowed_containers,
            current_usage,
            created_at: license.created_at,
            expires_at: license.expires_at,
        }
    }
}
