use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WebhookLogStatus {
    /// Stored, not yet checked
    Received,
    Processed,
    /// Event id was already processed by an earlier delivery
    Duplicate,
    /// Authentic, but not an event type we act on
    Ignored,
    /// Signature check failed
    Rejected,
    Failed,
}

/// Audit record of one inbound webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookLog {
    pub id: i64,
    pub received_at: i64,
    pub payload: Vec<u8>,
    pub signature: Option<String>,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub status: WebhookLogStatus,
    pub error: Option<String>,
    pub processed_at: Option<i64>,
}
