//! Shared request helpers.

use axum::http::HeaderMap;

/// Read a header as trimmed UTF-8.
///
/// Returns None if the header is missing, not valid UTF-8, or blank.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
