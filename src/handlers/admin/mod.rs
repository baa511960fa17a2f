mod licenses;

pub use licenses::*;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::db::AppState;
use crate::middleware::require_admin_key;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/admin/licenses/{id}/usage", get(get_license_usage))
        .route("/api/admin/licenses/{id}/reset-machines", post(reset_machines))
        .route("/api/admin/licenses/{id}/status", put(update_license_status))
        .route_layer(middleware::from_fn_with_state(state, require_admin_key))
}
