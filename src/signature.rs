//! Paddle webhook signature verification.
//!
//! Header layout: `ts=<unix seconds>;h1=<hex hmac>`. The digest is
//! HMAC-SHA256 over `"{ts}.{raw body}"` keyed with the notification secret.
//! Several `h1` entries may be present while a secret is being rotated.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window for webhook timestamps.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("webhook signature timestamp outside tolerance")]
    StaleSignature,
    #[error("malformed webhook signature header")]
    MalformedHeader,
}

struct ParsedHeader {
    timestamp: i64,
    digests: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut digests = Vec::new();

    for part in header.split([';', ',']) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = part.split_once('=').ok_or(SignatureError::MalformedHeader)?;
        match key.trim() {
            "ts" => {
                let ts = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| SignatureError::MalformedHeader)?;
                timestamp = Some(ts);
            }
            "h1" => {
                let digest =
                    hex::decode(value.trim()).map_err(|_| SignatureError::MalformedHeader)?;
                digests.push(digest);
            }
            // Unknown schemes are skipped so new versions don't break us
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !digests.is_empty() => Ok(ParsedHeader { timestamp, digests }),
        _ => Err(SignatureError::MalformedHeader),
    }
}

/// Compute the hex digest the provider would send for `payload` at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    hex::encode(compute_digest(payload, secret, timestamp))
}

/// Build a full `Paddle-Signature` header value.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!("ts={};h1={}", timestamp, sign(payload, secret, timestamp))
}

fn compute_digest(payload: &[u8], secret: &str, timestamp: i64) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC can take key of any size"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Verify a webhook signature against the current time.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
) -> Result<(), SignatureError> {
    verify_at(payload, header, secret, tolerance, Utc::now().timestamp())
}

/// Verify a webhook signature against an explicit `now`.
///
/// The digest is checked first, so `StaleSignature` always means an
/// authentic but replayed (or badly clock-skewed) delivery.
pub fn verify_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;
    let expected = compute_digest(payload, secret, parsed.timestamp);

    let matched = parsed
        .digests
        .iter()
        .fold(false, |acc, digest| acc | bool::from(expected.ct_eq(digest)));
    if !matched {
        return Err(SignatureError::InvalidSignature);
    }

    if now.abs_diff(parsed.timestamp) > tolerance.as_secs() {
        return Err(SignatureError::StaleSignature);
    }

    Ok(())
}
