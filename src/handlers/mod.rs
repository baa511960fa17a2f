pub mod admin;
pub mod public;
pub mod webhooks;

use axum::{
    Router,
    http::{HeaderName, Method, header},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db::AppState;
use crate::middleware::ADMIN_KEY_HEADER;

/// Full HTTP surface with shared state applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(ADMIN_KEY_HEADER),
        ]);

    Router::new()
        .merge(public::router())
        .merge(webhooks::router())
        .merge(admin::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
