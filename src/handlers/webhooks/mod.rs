mod paddle;

pub use paddle::*;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/paddle/webhook", post(handle_paddle_webhook))
}
