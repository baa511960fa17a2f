use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    /// Canonical form, see [`normalize_email`]
    pub email: String,
    pub paddle_customer_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Canonical email used for storage and lookup: trimmed, NFKC, lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().nfkc().collect::<String>().to_lowercase()
}
