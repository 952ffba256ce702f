//! Administrative endpoints

use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::prelude::*;
use farmconf_core::scheduler::SchedulerHealth;

/// Request body of the snapshot reset
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
	pub tenant: TenantKey,
	pub key: String,
}

/// POST /admin/reset - Drop a tenant's cached configuration snapshot
///
/// Answers 204 when the snapshot was dropped, 403 when the key does not
/// match the configured admin key and 404 for an unknown tenant.
pub async fn post_reset(
	State(app): State<App>,
	Json(req): Json<ResetRequest>,
) -> ClResult<StatusCode> {
	if !key_matches(app.opts.admin_key.as_deref(), &req.key) {
		warn!(tenant = %req.tenant, "Snapshot reset rejected: key mismatch");
		return Err(Error::PermissionDenied);
	}

	app.adapter.read_tenant(&req.tenant).await.map_err(|e| match e {
		Error::NotFound => Error::UnknownTenant(req.tenant.clone()),
		e => e,
	})?;
	app.cache.invalidate(&req.tenant).await?;

	info!(tenant = %req.tenant, "Configuration snapshot reset");
	Ok(StatusCode::NO_CONTENT)
}

/// GET /health - Scheduler queue counts
pub async fn get_health(State(app): State<App>) -> ClResult<Json<SchedulerHealth>> {
	Ok(Json(app.scheduler.health_check().await?))
}

/// SHA-256 digest comparison of the configured and the provided key
fn key_matches(expected: Option<&str>, provided: &str) -> bool {
	let Some(expected) = expected else {
		return false;
	};
	Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}


// vim: ts=4
