use chrono::{Duration, Utc};

use crate::db::{DbPool, queries};
use crate::email::{DELIVERY_TIMEOUT, EmailService, Notifier};
use crate::error::{AppError, Result, TokenError};
use crate::models::{Customer, LicenseSummary, normalize_email};
use crate::token::{expiry_from_now, generate_token, hash_token};

/// A freshly issued link. `token` is the only copy of the plaintext.
#[derive(Debug, Clone)]
pub struct IssuedMagicLink {
    pub customer_id: i64,
    pub email: String,
    pub token: String,
    pub claim_url: String,
    pub expires_at: i64,
    /// False when the notifier failed; the token is still valid
    pub delivered: bool,
}

/// Email-possession access to a customer's licenses.
///
/// Tokens move `issued → claimed | expired` and never leave either end
/// state. Only the SHA-256 of a token is stored.
#[derive(Clone)]
pub struct MagicLinkEngine<N: Notifier = EmailService> {
    db: DbPool,
    notifier: N,
    portal_url: String,
    ttl: Duration,
    delivery_timeout: std::time::Duration,
}

impl<N: Notifier> MagicLinkEngine<N> {
    pub fn new(db: DbPool, notifier: N, portal_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            db,
            notifier,
            portal_url: portal_url.into(),
            ttl,
            delivery_timeout: DELIVERY_TIMEOUT,
        }
    }

    /// Override how long `request_link` waits on the notifier.
    pub fn with_delivery_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    fn claim_url(&self, token: &str) -> String {
        let separator = if self.portal_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}token={}",
            self.portal_url,
            separator,
            urlencoding::encode(token)
        )
    }

    /// Issue a token for `email` and hand the claim URL to the notifier.
    ///
    /// Succeeds for any well-formed address whether or not it owns licenses.
    /// Delivery failures and timeouts are logged and reported through
    /// `delivered`; the stored token is kept.
    pub async fn request_link(&self, email: &str) -> Result<IssuedMagicLink> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::BadRequest("A valid email is required".into()));
        }

        let token = generate_token();
        let expires_at = expiry_from_now(self.ttl);

        // Pool connection is released before the notifier await
        let customer = {
            let conn = self.db.get()?;
            let customer = queries::find_or_create_customer(&conn, &email)?;
            queries::create_magic_token(&conn, customer.id, &hash_token(&token), expires_at)?;
            customer
        };

        let claim_url = self.claim_url(&token);
        let send = self.notifier.send(&customer.email, &claim_url, expires_at);
        let delivered = match tokio::time::timeout(self.delivery_timeout, send).await {
            Ok(Ok(result)) => {
                tracing::debug!(customer_id = customer.id, ?result, "Magic link delivered");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    customer_id = customer.id,
                    error = %e,
                    "Magic link delivery failed"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    customer_id = customer.id,
                    timeout_ms = self.delivery_timeout.as_millis() as u64,
                    "Magic link delivery timed out"
                );
                false
            }
        };

        Ok(IssuedMagicLink {
            customer_id: customer.id,
            email: customer.email,
            token,
            claim_url,
            expires_at,
            delivered,
        })
    }

    /// Check a token without consuming it.
    pub fn verify_token(&self, token: &str) -> Result<Customer> {
        let conn = self.db.get()?;
        let record = queries::get_magic_token_by_hash(&conn, &hash_token(token))?
            .ok_or(TokenError::NotFound)?;
        record.check_usable(Utc::now().timestamp())?;

        queries::get_customer_by_id(&conn, record.customer_id)?.ok_or_else(|| {
            AppError::Internal(format!("customer {} missing for token", record.customer_id))
        })
    }

    /// Consume a token and return every license its customer owns.
    pub fn claim(&self, token: &str) -> Result<Vec<LicenseSummary>> {
        let mut conn = self.db.get()?;
        let record =
            queries::claim_magic_token_atomic(&mut conn, &hash_token(token), Utc::now().timestamp())?;

        let licenses = queries::list_licenses_for_customer(&conn, record.customer_id)?;
        let summaries = licenses
            .into_iter()
            .map(|license| -> Result<LicenseSummary> {
                let usage = queries::count_bindings_for_license(&conn, license.id)?;
                Ok(LicenseSummary::new(license, usage))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            customer_id = record.customer_id,
            license_count = summaries.len(),
            "Magic link claimed"
        );
        Ok(summaries)
    }
}
