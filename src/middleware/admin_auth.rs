use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::AppError;
use crate::util::header_str;

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

/// Gate admin routes on the shared admin key.
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = header_str(request.headers(), ADMIN_KEY_HEADER).ok_or(AppError::Unauthorized)?;

    let expected = state.admin_api_key.as_bytes();
    if expected.is_empty() || !bool::from(provided.as_bytes().ct_eq(expected)) {
        tracing::warn!(path = %request.uri().path(), "Rejected admin request with bad key");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}
