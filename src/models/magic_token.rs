use serde::Serialize;

use crate::error::TokenError;

#[derive(Debug, Clone, Serialize)]
pub struct MagicToken {
    pub id: i64,
    /// SHA-256 of the token; the plaintext only lives in the emailed link
    #[serde(skip)]
    pub token_hash: String,
    pub customer_id: i64,
    pub created_at: i64,
    pub expires_at: i64,
    pub used_at: Option<i64>,
}

impl MagicToken {
    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// `issued → claimed | expired`; both end states are terminal.
    /// A used token reports `AlreadyUsed` even once it has also expired.
    pub fn check_usable(&self, now: i64) -> Result<(), TokenError> {
        if self.is_used() {
            return Err(TokenError::AlreadyUsed);
        }
        if self.is_expired_at(now) {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}
