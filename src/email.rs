//! Magic link delivery.
//!
//! Supports three modes:
//! 1. POST to webhook URL (for DIY email delivery)
//! 2. Send via Resend API (when an API key is configured)
//! 3. Disabled (no email sent, log only)

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Upper bound on one delivery attempt, connect included.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email transport failed: {0}")]
    Transport(String),
    #[error("email provider rejected the message: {status} {body}")]
    Rejected { status: u16, body: String },
}

/// How a magic link left the building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailSendResult {
    /// Email was sent via Resend
    Sent,
    /// Link was POSTed to the configured webhook URL
    WebhookCalled,
    /// No delivery configured; the link was only logged
    Disabled,
}

/// Delivers claim links to customers.
///
/// The magic link engine is generic over this so tests can record or fail
/// deliveries without a network.
pub trait Notifier: Clone + Send + Sync + 'static {
    fn send(
        &self,
        to: &str,
        claim_url: &str,
        expires_at: i64,
    ) -> impl Future<Output = Result<EmailSendResult, NotifyError>> + Send;
}

/// Format a Unix timestamp for the email body (e.g. "Jan 15, 2024 14:05 UTC").
fn format_expiry(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%b %d, %Y %H:%M UTC").to_string())
        .unwrap_or_else(|| "soon".to_string())
}

/// Webhook payload sent when `EMAIL_WEBHOOK_URL` is configured.
#[derive(Debug, Serialize)]
pub struct MagicLinkWebhookPayload<'a> {
    pub event: &'static str,
    pub email: &'a str,
    pub claim_url: &'a str,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'static str,
    text: String,
    html: String,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    #[allow(dead_code)]
    id: String,
}

fn http_client() -> Client {
    Client::builder()
        .timeout(DELIVERY_TIMEOUT)
        .connect_timeout(DELIVERY_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            // The engine still bounds each send with DELIVERY_TIMEOUT
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            Client::new()
        })
}

#[derive(Clone)]
pub struct EmailService {
    resend_api_key: Option<String>,
    from_email: String,
    webhook_url: Option<String>,
    http_client: Client,
}

impl EmailService {
    pub fn new(
        resend_api_key: Option<String>,
        from_email: String,
        webhook_url: Option<String>,
    ) -> Self {
        Self {
            resend_api_key,
            from_email,
            webhook_url,
            http_client: http_client(),
        }
    }

    /// Log-only service.
    pub fn disabled() -> Self {
        Self::new(None, String::new(), None)
    }

    async fn send_via_resend(
        &self,
        api_key: &str,
        to: &str,
        claim_url: &str,
        expires_at: i64,
    ) -> Result<EmailSendResult, NotifyError> {
        let expiry = format_expiry(expires_at);
        let text = format!(
            "Access your Convia licenses\n\nOpen this link to view your license keys:\n\n{}\n\nThe link works once and expires at {}.\n\nIf you didn't request this, you can ignore this email.",
            claim_url, expiry
        );
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
<h2 style="color: #333;">Access your Convia licenses</h2>
<p>Open this link to view your license keys:</p>
<p style="margin: 24px 0;"><a href="{}" style="background: #333; color: #fff; padding: 12px 20px; border-radius: 6px; text-decoration: none;">View my licenses</a></p>
<p style="color: #666;">The link works once and expires at {}.</p>
<hr style="border: none; border-top: 1px solid #eee; margin: 30px 0;">
<p style="color: #999; font-size: 12px;">If you didn't request this, you can ignore this email.</p>
</body>
</html>"#,
            claim_url, expiry
        );

        let request = ResendEmailRequest {
            from: &self.from_email,
            to: vec![to],
            subject: "Your Convia license access link",
            text,
            html,
        };

        let response = self
            .http_client
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if response.status().is_success() {
            let _result: ResendEmailResponse = response
                .json()
                .await
                .map_err(|e| NotifyError::Transport(e.to_string()))?;
            tracing::info!(to = %to, "Magic link email sent via Resend");
            Ok(EmailSendResult::Sent)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected { status, body })
        }
    }

    async fn call_webhook(
        &self,
        webhook_url: &str,
        to: &str,
        claim_url: &str,
        expires_at: i64,
    ) -> Result<EmailSendResult, NotifyError> {
        let payload = MagicLinkWebhookPayload {
            event: "magic_link_created",
            email: to,
            claim_url,
            expires_at,
        };

        let response = self
            .http_client
            .post(webhook_url)
            .header("X-Convia-Event", "magic_link_created")
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if response.status().is_success() {
            tracing::info!(webhook_url = %webhook_url, "Magic link webhook called");
            Ok(EmailSendResult::WebhookCalled)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected { status, body })
        }
    }
}

impl Notifier for EmailService {
    /// Resolution order: webhook URL, then Resend, then log only.
    async fn send(
        &self,
        to: &str,
        claim_url: &str,
        expires_at: i64,
    ) -> Result<EmailSendResult, NotifyError> {
        if let Some(webhook_url) = &self.webhook_url {
            return self.call_webhook(webhook_url, to, claim_url, expires_at).await;
        }

        let Some(api_key) = &self.resend_api_key else {
            tracing::warn!(
                to = %to,
                claim_url = %claim_url,
                "No email delivery configured, magic link only logged"
            );
            return Ok(EmailSendResult::Disabled);
        };

        self.send_via_resend(api_key, to, claim_url, expires_at).await
    }
}
