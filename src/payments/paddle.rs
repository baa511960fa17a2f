//! Paddle Billing webhook payloads.
//!
//! Only the fields the license lifecycle reads are modelled; everything is
//! optional so a payload that omits a field reaches the lifecycle checks
//! instead of failing deserialization.

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::error::LifecycleError;

/// Notification envelope. `data` is decoded once the event type is known.
#[derive(Debug, Clone, Deserialize)]
pub struct PaddleWebhookEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    /// RFC 3339
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl PaddleWebhookEvent {
    pub fn occurred_at_unix(&self) -> Result<Option<i64>, LifecycleError> {
        parse_rfc3339(self.occurred_at.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleSubscription {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Present when the notification includes the customer entity
    #[serde(default)]
    pub customer: Option<PaddleCustomer>,
    #[serde(default)]
    pub items: Vec<PaddleItem>,
    #[serde(default)]
    pub current_billing_period: Option<PaddleBillingPeriod>,
    #[serde(default)]
    pub custom_data: Option<PaddleCustomData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleCustomer {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleItem {
    #[serde(default)]
    pub price: Option<PaddlePrice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddlePrice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleBillingPeriod {
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
}

/// Checkout `custom_data` we pass through Paddle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleCustomData {
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleTransaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

impl PaddleSubscription {
    pub fn subscription_id(&self) -> Result<&str, LifecycleError> {
        non_empty(self.id.as_deref()).ok_or(LifecycleError::MissingField("data.id"))
    }

    pub fn email(&self) -> Option<&str> {
        let from_customer = self.customer.as_ref().and_then(|c| c.email.as_deref());
        let from_custom_data = self.custom_data.as_ref().and_then(|c| c.email.as_deref());
        non_empty(from_customer).or(non_empty(from_custom_data))
    }

    pub fn paddle_customer_id(&self) -> Option<&str> {
        let nested = self.customer.as_ref().and_then(|c| c.id.as_deref());
        non_empty(self.customer_id.as_deref()).or(non_empty(nested))
    }

    /// Plan from checkout custom data, falling back to the first item's
    /// price name.
    pub fn plan_name(&self) -> Option<&str> {
        let custom = self.custom_data.as_ref().and_then(|c| c.plan.as_deref());
        let price_name = self
            .items
            .first()
            .and_then(|item| item.price.as_ref())
            .and_then(|price| price.name.as_deref());
        non_empty(custom).or(non_empty(price_name))
    }

    /// End of the paid period, used as the license expiry.
    pub fn period_ends_at(&self) -> Result<Option<i64>, LifecycleError> {
        let ends_at = self
            .current_billing_period
            .as_ref()
            .and_then(|p| p.ends_at.as_deref());
        parse_rfc3339(ends_at)
    }
}

/// Closed set of notifications that affect licenses.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// created, activated or resumed
    Activated(PaddleSubscription),
    Updated(PaddleSubscription),
    Canceled { subscription_id: String },
    /// past_due, paused or a failed renewal payment
    PastDue { subscription_id: String },
    Unrecognized(String),
}

impl LifecycleEvent {
    pub fn from_event(event: &PaddleWebhookEvent) -> Result<Self, LifecycleError> {
        let lifecycle = match event.event_type.as_str() {
            "subscription.created" | "subscription.activated" | "subscription.resumed" => {
                LifecycleEvent::Activated(decode_subscription(&event.data)?)
            }
            "subscription.updated" => LifecycleEvent::Updated(decode_subscription(&event.data)?),
            "subscription.canceled" | "subscription.cancelled" => LifecycleEvent::Canceled {
                subscription_id: decode_subscription(&event.data)?
                    .subscription_id()?
                    .to_string(),
            },
            "subscription.past_due" | "subscription.paused" => LifecycleEvent::PastDue {
                subscription_id: decode_subscription(&event.data)?
                    .subscription_id()?
                    .to_string(),
            },
            "transaction.payment_failed" => {
                let transaction: PaddleTransaction = serde_json::from_value(event.data.clone())
                    .map_err(|_| LifecycleError::MissingField("data"))?;
                let subscription_id = non_empty(transaction.subscription_id.as_deref())
                    .ok_or(LifecycleError::MissingField("data.subscription_id"))?;
                LifecycleEvent::PastDue {
                    subscription_id: subscription_id.to_string(),
                }
            }
            other => LifecycleEvent::Unrecognized(other.to_string()),
        };
        Ok(lifecycle)
    }
}

fn decode_subscription(data: &Value) -> Result<PaddleSubscription, LifecycleError> {
    serde_json::from_value(data.clone()).map_err(|_| LifecycleError::MissingField("data"))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_rfc3339(raw: Option<&str>) -> Result<Option<i64>, LifecycleError> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp())
            .map_err(|_| LifecycleError::InvalidTimestamp(s.to_string()))
    })
    .transpose()
}
