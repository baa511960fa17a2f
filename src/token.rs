//! Opaque token and license key generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};

/// Number of random bytes behind every magic token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Unambiguous alphabet for license keys (no 0/O, 1/I).
const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a URL-safe opaque token with 256 bits of entropy.
///
/// The output is always 43 characters (base64url, no padding).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Unix timestamp `duration` from now.
pub fn expiry_from_now(duration: Duration) -> i64 {
    (Utc::now() + duration).timestamp()
}

/// Hash a token for storage/lookup. Only the hash is persisted, so a leaked
/// database does not hand out claimable links.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"convia-magic-token-v1:");
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a license key in the familiar format: PREFIX-XXXX-XXXX-XXXX-XXXX
pub fn generate_license_key(prefix: &str) -> String {
    let mut rng = rand::thread_rng();

    let mut part = || -> String {
        (0..4)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect()
    };

    format!("{}-{}-{}-{}-{}", prefix, part(), part(), part(), part())
}
