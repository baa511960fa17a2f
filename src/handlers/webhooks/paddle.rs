use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::db::AppState;
use crate::error::AppError;
use crate::licensing::WebhookAck;
use crate::util::header_str;

pub const PADDLE_SIGNATURE_HEADER: &str = "Paddle-Signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WebhookResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            event_type: None,
            event_id: None,
            license_id: None,
            detail: None,
        }
    }
}

impl From<WebhookAck> for WebhookResponse {
    fn from(ack: WebhookAck) -> Self {
        match ack {
            WebhookAck::Processed {
                event_type,
                license_id,
            } => WebhookResponse {
                event_type: Some(event_type),
                license_id: Some(license_id),
                ..Self::status("processed")
            },
            WebhookAck::Duplicate { event_id } => WebhookResponse {
                event_id: Some(event_id),
                ..Self::status("duplicate")
            },
            WebhookAck::Ignored { event_type } => WebhookResponse {
                event_type: Some(event_type),
                ..Self::status("ignored")
            },
        }
    }
}

/// Paddle retries anything that isn't 2xx. Events we can never apply are
/// acknowledged with 200 so they stop coming back; store failures are not.
pub async fn handle_paddle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_str(&headers, PADDLE_SIGNATURE_HEADER);

    match state.webhooks.handle(&body, signature) {
        Ok(ack) => (StatusCode::OK, Json(WebhookResponse::from(ack))).into_response(),
        Err(AppError::Lifecycle(e)) => (
            StatusCode::OK,
            Json(WebhookResponse {
                detail: Some(e.to_string()),
                ..WebhookResponse::status("failed")
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
