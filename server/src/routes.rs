use axum::{
	Router,
	routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::prelude::*;

pub fn init(app: App) -> Router {
	Router::new()
		.route("/health", get(admin::get_health))
		.route("/admin/reset", post(admin::post_reset))
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

// vim: ts=4
