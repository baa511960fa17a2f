use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};

use crate::db::{DbPool, queries};
use crate::error::{AppError, LifecycleError, Result, SignatureError};
use crate::models::{LicenseStatus, LifecycleTransition, SubscriptionTerms, WebhookLogStatus};
use crate::payments::{LifecycleEvent, PaddleSubscription, PaddleWebhookEvent};
use crate::plans::{PlanTable, normalize_plan};
use crate::signature;

/// Successful outcomes of a delivery. Every variant is acknowledged to Paddle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookAck {
    Processed { event_type: String, license_id: i64 },
    /// The event id was already applied by an earlier delivery
    Duplicate { event_id: String },
    /// Authentic but not a license lifecycle event
    Ignored { event_type: String },
}

#[derive(Clone)]
pub struct WebhookProcessor {
    db: DbPool,
    secret: String,
    tolerance: Duration,
    plans: Arc<PlanTable>,
    license_key_prefix: String,
}

/// Paddle subscription status → license status for `subscription.updated`.
fn license_status_for(subscription_status: Option<&str>) -> LicenseStatus {
    match subscription_status.map(str::to_ascii_lowercase).as_deref() {
        Some("canceled") | Some("cancelled") => LicenseStatus::Cancelled,
        Some("past_due") | Some("paused") => LicenseStatus::Suspended,
        _ => LicenseStatus::Active,
    }
}

impl WebhookProcessor {
    pub fn new(
        db: DbPool,
        secret: impl Into<String>,
        tolerance: Duration,
        plans: PlanTable,
        license_key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db,
            secret: secret.into(),
            tolerance,
            plans: Arc::new(plans),
            license_key_prefix: license_key_prefix.into(),
        }
    }

    /// Authenticate, record and apply one delivery.
    pub fn handle(&self, raw_payload: &[u8], signature_header: Option<&str>) -> Result<WebhookAck> {
        self.handle_at(raw_payload, signature_header, Utc::now().timestamp())
    }

    /// Same as [`handle`](Self::handle) with an explicit clock for the
    /// signature tolerance check.
    ///
    /// The raw body is logged before anything else. Authentic events are
    /// deduplicated by event id and applied in one IMMEDIATE transaction
    /// together with the log outcome, so a replay can never apply twice.
    pub fn handle_at(
        &self,
        raw_payload: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<WebhookAck> {
        let mut conn = self.db.get()?;
        let log_id = queries::create_webhook_log(&conn, raw_payload, signature_header)?;

        let verified = signature_header
            .ok_or(SignatureError::MalformedHeader)
            .and_then(|header| {
                signature::verify_at(raw_payload, header, &self.secret, self.tolerance, now)
            });
        if let Err(e) = verified {
            tracing::warn!(log_id, error = %e, "Rejected webhook delivery");
            queries::finish_webhook_log(&conn, log_id, WebhookLogStatus::Rejected, Some(&e.to_string()))?;
            return Err(e.into());
        }

        let event: PaddleWebhookEvent = match serde_json::from_slice(raw_payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(log_id, error = %e, "Unparseable webhook payload");
                queries::finish_webhook_log(&conn, log_id, WebhookLogStatus::Failed, Some(&e.to_string()))?;
                return Err(AppError::BadRequest(format!("Invalid webhook payload: {}", e)));
            }
        };
        queries::tag_webhook_log(&conn, log_id, event.event_id.as_deref(), &event.event_type)?;

        let planned = LifecycleEvent::from_event(&event).and_then(|lifecycle| {
            match self.transition_for(&lifecycle)? {
                Some((subscription_id, transition)) => {
                    Ok(Some((subscription_id, transition, event.occurred_at_unix()?)))
                }
                None => Ok(None),
            }
        });
        let (subscription_id, transition, occurred_at) = match planned {
            Ok(Some(planned)) => planned,
            Ok(None) => {
                tracing::info!(log_id, event_type = %event.event_type, "Ignoring webhook event");
                queries::finish_webhook_log(&conn, log_id, WebhookLogStatus::Ignored, None)?;
                return Ok(WebhookAck::Ignored {
                    event_type: event.event_type,
                });
            }
            Err(e) => return self.reject_event(&conn, log_id, e),
        };

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(event_id) = event.event_id.as_deref()
            && queries::event_already_processed(&tx, event_id)?
        {
            queries::finish_webhook_log(&tx, log_id, WebhookLogStatus::Duplicate, None)?;
            tx.commit()?;
            tracing::info!(log_id, event_id = %event_id, "Duplicate webhook delivery");
            return Ok(WebhookAck::Duplicate {
                event_id: event_id.to_string(),
            });
        }

        let applied = queries::apply_lifecycle_event(
            &tx,
            &subscription_id,
            &transition,
            occurred_at,
            &self.license_key_prefix,
        );

        match applied {
            Ok(license) => {
                queries::finish_webhook_log(&tx, log_id, WebhookLogStatus::Processed, None)?;
                tx.commit()?;
                tracing::info!(
                    log_id,
                    event_type = %event.event_type,
                    subscription_id = %subscription_id,
                    license_id = license.id,
                    status = license.status.as_ref(),
                    plan = %license.plan,
                    "Applied webhook event"
                );
                Ok(WebhookAck::Processed {
                    event_type: event.event_type,
                    license_id: license.id,
                })
            }
            Err(AppError::Lifecycle(e)) => {
                drop(tx);
                self.reject_event(&conn, log_id, e)
            }
            Err(e) => {
                drop(tx);
                if let Err(log_err) =
                    queries::finish_webhook_log(&conn, log_id, WebhookLogStatus::Failed, Some(&e.to_string()))
                {
                    tracing::error!(log_id, error = %log_err, "Failed to record webhook failure");
                }
                Err(e)
            }
        }
    }

    /// Resolve the license transition for an event; `None` for event types
    /// that don't touch licenses.
    fn transition_for(
        &self,
        lifecycle: &LifecycleEvent,
    ) -> std::result::Result<Option<(String, LifecycleTransition)>, LifecycleError> {
        let planned = match lifecycle {
            LifecycleEvent::Activated(sub) => (
                sub.subscription_id()?.to_string(),
                LifecycleTransition::Activate(self.terms_for(sub)?),
            ),
            LifecycleEvent::Updated(sub) => (
                sub.subscription_id()?.to_string(),
                LifecycleTransition::ChangePlan(self.terms_for(sub)?),
            ),
            LifecycleEvent::Canceled { subscription_id } => {
                (subscription_id.clone(), LifecycleTransition::Cancel)
            }
            LifecycleEvent::PastDue { subscription_id } => {
                (subscription_id.clone(), LifecycleTransition::Suspend)
            }
            LifecycleEvent::Unrecognized(_) => return Ok(None),
        };
        Ok(Some(planned))
    }

    fn terms_for(
        &self,
        sub: &PaddleSubscription,
    ) -> std::result::Result<SubscriptionTerms, LifecycleError> {
        let plan = sub
            .plan_name()
            .map(normalize_plan)
            .unwrap_or_else(|| self.plans.default_plan().to_string());
        Ok(SubscriptionTerms {
            email: sub.email().map(String::from),
            paddle_customer_id: sub.paddle_customer_id().map(String::from),
            allowed_containers: self.plans.quota_for(&plan),
            plan,
            expires_at: sub.period_ends_at()?,
            status: license_status_for(sub.status.as_deref()),
        })
    }

    /// Log a permanently inapplicable event as failed and surface it.
    fn reject_event(&self, conn: &Connection, log_id: i64, err: LifecycleError) -> Result<WebhookAck> {
        tracing::warn!(log_id, error = %err, "Webhook event could not be applied");
        queries::finish_webhook_log(conn, log_id, WebhookLogStatus::Failed, Some(&err.to_string()))?;
        Err(err.into())
    }
}
