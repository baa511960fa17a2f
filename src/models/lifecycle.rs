use super::LicenseStatus;

/// Subscription state carried by activation and plan-change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTerms {
    pub email: Option<String>,
    pub paddle_customer_id: Option<String>,
    pub plan: String,
    pub allowed_containers: i64,
    pub expires_at: Option<i64>,
    pub status: LicenseStatus,
}

/// A license state change requested by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleTransition {
    /// Create the license, or reactivate and renew an existing one
    Activate(SubscriptionTerms),
    /// Plan, quota, expiry or status change. Existing bindings are kept
    /// even when the new quota is below the current binding count.
    ChangePlan(SubscriptionTerms),
    Cancel,
    Suspend,
}
