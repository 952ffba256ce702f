//! HTTP surface tests
//!
//! Requests go through the router with `tower::ServiceExt::oneshot`, the app
//! is backed by a temporary SQLite database.

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use farmconf::bootstrap::bootstrap;
use farmconf::routes;
use farmconf_config_adapter_sqlite::ConfigAdapterSqlite;
use farmconf_core::registry::ModuleRegistry;
use farmconf_core::{App, AppBuilder};
use farmconf_types::types::TenantKey;
use serde_json::json;
use tempfile::TempDir;
use tower::ServiceExt;

fn tenant() -> TenantKey {
	TenantKey::new("wikidb").unwrap()
}

async fn build_app(temp: &TempDir, configure: impl FnOnce(&mut AppBuilder)) -> App {
	let adapter = ConfigAdapterSqlite::new(temp.path()).await.expect("Failed to create adapter");
	let mut builder = AppBuilder::new();
	builder.config_adapter(Arc::new(adapter));
	configure(&mut builder);
	builder.build().await.expect("Failed to build app")
}

async fn post_reset(app: &App, body: serde_json::Value) -> StatusCode {
	let request = Request::builder()
		.method("POST")
		.uri("/admin/reset")
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap();
	routes::init(app.clone()).oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn test_reset_drops_snapshot() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |b| {
		b.admin_key("secret");
	})
	.await;
	ModuleRegistry::new(&app).create_tenant(&tenant(), "Wiki DB", "en").await.unwrap();
	let before = app.cache.get(&tenant()).await.unwrap();

	let status = post_reset(&app, json!({ "tenant": "wikidb", "key": "secret" })).await;
	assert_eq!(status, StatusCode::NO_CONTENT);

	let after = app.cache.get(&tenant()).await.unwrap();
	assert_ne!(before.cache_version, after.cache_version);
	assert_eq!(before.source_version, after.source_version);
}

#[tokio::test]
async fn test_reset_rejects_wrong_key() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |b| {
		b.admin_key("secret");
	})
	.await;
	ModuleRegistry::new(&app).create_tenant(&tenant(), "Wiki DB", "en").await.unwrap();
	let before = app.cache.get(&tenant()).await.unwrap();

	let status = post_reset(&app, json!({ "tenant": "wikidb", "key": "guess" })).await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	// Snapshot untouched
	let after = app.cache.get(&tenant()).await.unwrap();
	assert_eq!(before.cache_version, after.cache_version);
}

#[tokio::test]
async fn test_reset_disabled_without_admin_key() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |_| {}).await;
	ModuleRegistry::new(&app).create_tenant(&tenant(), "Wiki DB", "en").await.unwrap();

	let status = post_reset(&app, json!({ "tenant": "wikidb", "key": "" })).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reset_unknown_tenant() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |b| {
		b.admin_key("secret");
	})
	.await;

	let status = post_reset(&app, json!({ "tenant": "nowiki", "key": "secret" })).await;
	assert_eq!(status, StatusCode::NOT_FOUND);

	// A key mismatch is reported before the tenant lookup
	let status = post_reset(&app, json!({ "tenant": "nowiki", "key": "guess" })).await;
	assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reset_rejects_invalid_tenant_key() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |b| {
		b.admin_key("secret");
	})
	.await;

	let status = post_reset(&app, json!({ "tenant": "Wiki DB", "key": "secret" })).await;
	assert!(status.is_client_error());
	assert_ne!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |_| {}).await;

	let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
	let response = routes::init(app).oneshot(request).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
	let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
	assert_eq!(health["scheduled"], json!(0));
	assert_eq!(health["running"], json!(0));
	assert_eq!(health["overdue_tasks"], json!([]));
}

#[tokio::test]
async fn test_bootstrap_provisions_system_tenant() {
	let temp = TempDir::new().unwrap();
	let app = build_app(&temp, |b| {
		b.system_tenant(TenantKey::new("metawiki").unwrap());
	})
	.await;
	let metawiki = TenantKey::new("metawiki").unwrap();

	bootstrap(&app).await.unwrap();
	let record = app.cache.get(&metawiki).await.unwrap();
	assert_eq!(&*record.core.sitename, "metawiki");
	assert!(record.namespaces.contains_key(&0));

	// Second start leaves the tenant alone
	bootstrap(&app).await.unwrap();
	let again = app.cache.get(&metawiki).await.unwrap();
	assert_eq!(record.source_version, again.source_version);
}

// vim: ts=4
