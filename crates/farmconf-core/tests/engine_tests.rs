//! Configuration engine tests
//!
//! Domain modules, snapshot cache and commit flow against a temporary
//! SQLite database.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use farmconf_config_adapter_sqlite::ConfigAdapterSqlite;
use farmconf_core::cache::MemoryCacheBackend;
use farmconf_core::catalog::{ExtensionDefinition, RIGHT_RESTRICTED_SETTINGS};
use farmconf_core::dependency::Requirement;
use farmconf_core::migration::KIND_NAMESPACE_MIGRATE;
use farmconf_core::modules::{
	CoreChange, ExtensionChange, NamespaceChange, PermissionChange, SettingChange,
};
use farmconf_core::plugin::ConfigPlugin;
use farmconf_core::scheduler::Task;
use farmconf_core::{App, AppBuilder, Caller, DomainModule, ModuleRegistry};
use farmconf_types::cache_adapter::CacheAdapter;
use farmconf_types::config_adapter::ListTaskOptions;
use farmconf_types::diff::ConfigDiff;
use farmconf_types::error::{Error, Violation};
use farmconf_types::record::{
	ConfigRecord, GroupPermissions, NamespaceDef, SettingValue, WikiState,
};
use farmconf_types::types::{TaskId, TenantKey};
use tempfile::TempDir;

/// Stands in for the real migration job, which lives in another crate
#[derive(Debug)]
struct NoopMigration;

#[async_trait]
impl Task<App> for NoopMigration {
	fn kind() -> &'static str {
		KIND_NAMESPACE_MIGRATE
	}

	fn build(_id: TaskId, _context: &str) -> Result<Arc<dyn Task<App>>, Error> {
		Ok(Arc::new(NoopMigration))
	}

	fn serialize(&self) -> String {
		String::new()
	}

	fn kind_of(&self) -> &'static str {
		KIND_NAMESPACE_MIGRATE
	}

	async fn run(&self, _app: &App) -> Result<(), Error> {
		Ok(())
	}
}

fn tenant() -> TenantKey {
	TenantKey::new("wikidb").unwrap()
}

async fn create_app(temp: &TempDir) -> App {
	create_app_with(temp, |_| {}).await
}

async fn create_app_with(temp: &TempDir, configure: impl FnOnce(&mut AppBuilder)) -> App {
	let adapter = ConfigAdapterSqlite::new(temp.path()).await.expect("Failed to create adapter");
	let mut builder = AppBuilder::new();
	builder.config_adapter(Arc::new(adapter)).on_init(|app| async move {
		app.scheduler.register::<NoopMigration>()?;
		Ok(())
	});
	let catalog = builder.catalog();
	catalog
		.register_extension(ExtensionDefinition::builder("A").description("Base").build().unwrap())
		.unwrap();
	catalog
		.register_extension(
			ExtensionDefinition::builder("B")
				.description("Needs A")
				.requires(Requirement::extensions(["A"]))
				.build()
				.unwrap(),
		)
		.unwrap();
	configure(&mut builder);
	builder.build().await.expect("Failed to build app")
}

async fn create_tenant(app: &App) -> ModuleRegistry {
	let registry = ModuleRegistry::new(app);
	registry.create_tenant(&tenant(), "Wiki DB", "en").await.unwrap();
	registry
}

fn admin() -> Caller {
	Caller::new(
		"Admin",
		[
			"manage-core",
			"manage-extensions",
			"manage-namespaces",
			"manage-settings",
			"manage-permissions",
		],
	)
}

// Snapshots
//***********

#[tokio::test]
async fn test_create_tenant_snapshot() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;

	let record = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(&*record.core.sitename, "Wiki DB");
	assert_eq!(record.source_version, 0);
	assert_eq!(record.namespaces.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
	assert!(record.permissions.contains_key("sysop"));

	let res = registry.create_tenant(&tenant(), "Again", "en").await;
	assert!(matches!(res, Err(Error::ValidationError(_))));
}

#[tokio::test]
async fn test_unknown_tenant() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = ModuleRegistry::new(&app);

	let res = registry.snapshot(&TenantKey::new("nowiki").unwrap()).await;
	assert!(matches!(res, Err(Error::UnknownTenant(_))));

	// A tenant created after a failed lookup is visible right away
	registry.create_tenant(&TenantKey::new("nowiki").unwrap(), "Now", "en").await.unwrap();
	assert!(registry.snapshot(&TenantKey::new("nowiki").unwrap()).await.is_ok());

	// Lookups of unknown tenants leave nothing behind
	for i in 0..10 {
		let res = registry.snapshot(&TenantKey::new(format!("ghost{}", i)).unwrap()).await;
		assert!(matches!(res, Err(Error::UnknownTenant(_))));
	}
	assert_eq!(app.cache.pending_builds(), 0);
}

#[tokio::test]
async fn test_cache_version_changes_after_invalidate() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;

	let first = registry.snapshot(&tenant()).await.unwrap();
	let second = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(first.cache_version, second.cache_version);

	app.cache.invalidate(&tenant()).await.unwrap();
	let third = registry.snapshot(&tenant()).await.unwrap();
	assert!(third.cache_version > first.cache_version);
	assert_eq!(third.source_version, first.source_version);
}

#[tokio::test]
async fn test_concurrent_cold_gets_share_one_build() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	create_tenant(&app).await;
	app.cache.invalidate(&tenant()).await.unwrap();

	let mut handles = Vec::new();
	for _ in 0..8 {
		let app = app.clone();
		handles.push(tokio::spawn(async move {
			app.cache.get(&tenant()).await.unwrap().cache_version
		}));
	}
	let mut versions = Vec::new();
	for handle in handles {
		versions.push(handle.await.unwrap());
	}
	versions.dedup();
	assert_eq!(versions.len(), 1);
	assert_eq!(app.cache.pending_builds(), 0);
}

/// Memory backend whose deletes can be switched to fail
#[derive(Debug)]
struct FlakyCache {
	inner: Arc<MemoryCacheBackend>,
	fail_deletes: AtomicBool,
}

#[async_trait]
impl CacheAdapter for FlakyCache {
	async fn get(&self, key: &str) -> Result<Option<Box<str>>, Error> {
		self.inner.get(key).await
	}

	async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
		self.inner.set(key, value).await
	}

	async fn delete(&self, key: &str) -> Result<(), Error> {
		if self.fail_deletes.load(Ordering::SeqCst) {
			return Err(Error::ServiceUnavailable("cache backend down".into()));
		}
		self.inner.delete(key).await
	}
}

#[tokio::test]
async fn test_commit_survives_failed_invalidation() {
	let temp = TempDir::new().unwrap();
	let cache = Arc::new(FlakyCache {
		inner: MemoryCacheBackend::new(16),
		fail_deletes: AtomicBool::new(false),
	});
	let backend = cache.clone();
	let app = create_app_with(&temp, move |builder| {
		builder.cache_backend(backend);
	})
	.await;
	let registry = create_tenant(&app).await;

	let mut namespaces = registry.namespaces(&tenant(), admin()).await.unwrap();
	namespaces.stage(NamespaceChange::Upsert { id: 100, def: NamespaceDef::new("Project") }).unwrap();
	namespaces.commit().await.unwrap();
	assert!(registry.snapshot(&tenant()).await.unwrap().namespaces.contains_key(&100));

	cache.fail_deletes.store(true, Ordering::SeqCst);
	namespaces
		.stage(NamespaceChange::Delete { id: 100, fallback: 0, maintain_prefix: false })
		.unwrap();
	let outcome = namespaces.commit().await.unwrap();
	assert_eq!(outcome.jobs.len(), 1);
	assert_eq!(outcome.jobs[0].key, "ns-migrate:wikidb:delete:100:0");

	let tasks = app
		.adapter
		.list_tasks(ListTaskOptions {
			status: Some(vec!['P', 'F', 'E']),
			kind: Some(KIND_NAMESPACE_MIGRATE.into()),
		})
		.await
		.unwrap();
	assert_eq!(tasks.len(), 1);

	// The rebuilt snapshot replaced the entry the backend refused to delete
	assert!(!app.cache.is_stale(&tenant()));
	assert!(!registry.snapshot(&tenant()).await.unwrap().namespaces.contains_key(&100));

	let before = registry.snapshot(&tenant()).await.unwrap();
	assert!(app.cache.invalidate(&tenant()).await.is_err());
	assert!(app.cache.is_stale(&tenant()));
	let after = registry.snapshot(&tenant()).await.unwrap();
	assert!(after.cache_version > before.cache_version);
	assert!(!app.cache.is_stale(&tenant()));
}

#[tokio::test]
async fn test_verify_detects_stale_snapshot() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	registry.snapshot(&tenant()).await.unwrap();
	assert!(!app.cache.verify(&tenant()).await.unwrap());

	// Write behind the cache's back
	let mut diff = farmconf_types::diff::ConfigDiff::default();
	diff.extensions.added.insert("A".into());
	app.adapter.commit_changeset(&tenant(), &diff).await.unwrap();

	assert!(app.cache.verify(&tenant()).await.unwrap());
	assert!(registry.snapshot(&tenant()).await.unwrap().has_extension("A"));
}

// Extensions
//************

#[tokio::test]
async fn test_enable_requires_dependency() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut extensions = registry.extensions(&tenant(), admin()).await.unwrap();

	let err = extensions.stage(ExtensionChange::Enable("B".into())).unwrap_err();
	assert_eq!(
		err.violations(),
		&[Violation::Unmet { subject: "B".into(), reference: "A".into(), negated: false }]
	);
	assert!(extensions.pending().is_empty());

	// Both in one changeset
	extensions.stage(ExtensionChange::Enable("A".into())).unwrap();
	extensions.stage(ExtensionChange::Enable("B".into())).unwrap();
	let outcome = extensions.commit().await.unwrap();
	assert_eq!(outcome.source_version, 1);

	let record = registry.snapshot(&tenant()).await.unwrap();
	assert!(record.has_extension("A") && record.has_extension("B"));
	assert_eq!(record.source_version, 1);
}

#[tokio::test]
async fn test_duplicate_enable_is_noop() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut extensions = registry.extensions(&tenant(), admin()).await.unwrap();

	extensions.stage(ExtensionChange::Enable("A".into())).unwrap();
	extensions.commit().await.unwrap();

	extensions.stage(ExtensionChange::Enable("A".into())).unwrap();
	let outcome = extensions.commit().await.unwrap();
	assert!(outcome.diff.is_empty());
	assert_eq!(outcome.source_version, 1);
}

#[tokio::test]
async fn test_disable_with_dependents() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut extensions = registry.extensions(&tenant(), admin()).await.unwrap();
	extensions.stage(ExtensionChange::Enable("A".into())).unwrap();
	extensions.stage(ExtensionChange::Enable("B".into())).unwrap();
	extensions.commit().await.unwrap();

	let err = extensions.stage(ExtensionChange::Disable("A".into())).unwrap_err();
	assert_eq!(
		err.violations(),
		&[Violation::Dependent { subject: "A".into(), dependent: "B".into() }]
	);

	extensions.stage(ExtensionChange::DisableCascade("A".into())).unwrap();
	let outcome = extensions.commit().await.unwrap();
	assert_eq!(outcome.diff.extensions.removed.len(), 2);
	assert!(extensions.list().is_empty());
}

#[tokio::test]
async fn test_unknown_extension() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut extensions = registry.extensions(&tenant(), admin()).await.unwrap();

	let res = extensions.stage(ExtensionChange::Enable("Nope".into()));
	assert!(matches!(res, Err(Error::ValidationError(_))));
	let available: Vec<Box<str>> = vec!["A".into(), "B".into()];
	assert_eq!(extensions.available(), available);
}

#[tokio::test]
async fn test_missing_right() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let caller = Caller::new("Reader", ["manage-settings"]);
	let mut extensions = registry.extensions(&tenant(), caller).await.unwrap();

	let res = extensions.stage(ExtensionChange::Enable("A".into()));
	assert!(matches!(res, Err(Error::PermissionDenied)));
}

// Settings
//**********

#[tokio::test]
async fn test_restricted_setting() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;

	let mut settings = registry.settings(&tenant(), admin()).await.unwrap();
	assert!(settings.get("wgDebugLogFile").is_none());
	assert!(settings.list().iter().all(|view| &*view.key != "wgDebugLogFile"));
	let res = settings.stage(SettingChange::Set {
		key: "wgDebugLogFile".into(),
		value: SettingValue::String("/tmp/debug.log".into()),
	});
	assert!(matches!(res, Err(Error::PermissionDenied)));

	let mut rights: Vec<&str> = vec!["manage-settings"];
	rights.push(RIGHT_RESTRICTED_SETTINGS);
	let mut settings = registry.settings(&tenant(), Caller::new("Steward", rights)).await.unwrap();
	settings
		.stage(SettingChange::Set {
			key: "wgDebugLogFile".into(),
			value: SettingValue::String("/tmp/debug.log".into()),
		})
		.unwrap();
	settings.commit().await.unwrap();
	let view = settings.get("wgDebugLogFile").unwrap();
	assert!(view.overridden);
}

#[tokio::test]
async fn test_setting_validation_and_defaults() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut settings = registry.settings(&tenant(), admin()).await.unwrap();

	assert_eq!(settings.effective("wgMaxArticleSize"), Some(SettingValue::Int(2048)));
	let res = settings.stage(SettingChange::Set {
		key: "wgMaxArticleSize".into(),
		value: SettingValue::String("big".into()),
	});
	assert!(matches!(res, Err(Error::ValidationError(_))));
	let res = settings.stage(SettingChange::Set {
		key: "wgMaxArticleSize".into(),
		value: SettingValue::Int(99_999),
	});
	assert!(matches!(res, Err(Error::ValidationError(_))));

	settings
		.stage(SettingChange::Set { key: "wgMaxArticleSize".into(), value: SettingValue::Int(4096) })
		.unwrap();
	settings.commit().await.unwrap();
	assert_eq!(settings.effective("wgMaxArticleSize"), Some(SettingValue::Int(4096)));

	settings.stage(SettingChange::Reset("wgMaxArticleSize".into())).unwrap();
	settings.commit().await.unwrap();
	let view = settings.get("wgMaxArticleSize").unwrap();
	assert_eq!((view.value, view.overridden), (SettingValue::Int(2048), false));
}

#[tokio::test]
async fn test_last_write_wins() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;

	let mut first = registry.settings(&tenant(), admin()).await.unwrap();
	let mut second = registry.settings(&tenant(), admin()).await.unwrap();

	first
		.stage(SettingChange::Set { key: "wgLogo".into(), value: SettingValue::String("a.png".into()) })
		.unwrap();
	second
		.stage(SettingChange::Set { key: "wgLogo".into(), value: SettingValue::String("b.png".into()) })
		.unwrap();
	assert_eq!(first.commit().await.unwrap().source_version, 1);
	assert_eq!(second.commit().await.unwrap().source_version, 2);

	let record = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(record.setting("wgLogo"), Some(&SettingValue::String("b.png".into())));
}

// Core
//******

#[tokio::test]
async fn test_core_changes() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut core = registry.core(&tenant(), admin()).await.unwrap();

	assert!(matches!(core.stage(CoreChange::Sitename("  ".into())), Err(Error::ValidationError(_))));
	assert!(matches!(core.stage(CoreChange::Language("EN".into())), Err(Error::ValidationError(_))));

	core.stage(CoreChange::Sitename("Renamed".into())).unwrap();
	core.stage(CoreChange::Language("de-at".into())).unwrap();
	core.stage(CoreChange::SetState { state: WikiState::Inactive, enabled: true }).unwrap();
	let res = core.stage(CoreChange::SetState { state: WikiState::InactiveExempt, enabled: true });
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));

	core.commit().await.unwrap();
	let attrs = core.attributes();
	assert_eq!((&*attrs.sitename, &*attrs.language), ("Renamed", "de-at"));
	assert!(attrs.has_state(WikiState::Inactive));
}

#[tokio::test]
async fn test_rollback_discards_changes() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut core = registry.core(&tenant(), admin()).await.unwrap();

	core.stage(CoreChange::Sitename("Renamed".into())).unwrap();
	assert!(!core.diff().is_empty());
	core.rollback();
	assert!(core.pending().is_empty());
	assert!(core.diff().is_empty());

	let outcome = core.commit().await.unwrap();
	assert_eq!(outcome.source_version, 0);
}

// Namespaces
//************

#[tokio::test]
async fn test_namespace_rules() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut namespaces = registry.namespaces(&tenant(), admin()).await.unwrap();

	let res = namespaces.stage(NamespaceChange::Delete { id: 0, fallback: 1, maintain_prefix: false });
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));

	let res = namespaces.stage(NamespaceChange::Upsert { id: 100, def: NamespaceDef::new("Talk") });
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));

	let res = namespaces.stage(NamespaceChange::Upsert { id: 100, def: NamespaceDef::new("Pro:ject") });
	assert!(matches!(res, Err(Error::ValidationError(_))));

	let res = namespaces.stage(NamespaceChange::Upsert {
		id: 100,
		def: NamespaceDef::new("Project").with_content_model("binary"),
	});
	assert!(matches!(res, Err(Error::ValidationError(_))));

	namespaces.stage(NamespaceChange::Upsert { id: 100, def: NamespaceDef::new("Project") }).unwrap();
	let res = namespaces.stage(NamespaceChange::Move { from: 100, to: 103 });
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));
	namespaces.commit().await.unwrap();

	assert_eq!(namespaces.by_name("Project").map(|(id, _)| id), Some(100));
}

#[tokio::test]
async fn test_namespace_delete_enqueues_migration() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut namespaces = registry.namespaces(&tenant(), admin()).await.unwrap();
	namespaces.stage(NamespaceChange::Upsert { id: 100, def: NamespaceDef::new("Project") }).unwrap();
	namespaces.stage(NamespaceChange::Upsert { id: 101, def: NamespaceDef::new("Project talk") }).unwrap();
	let outcome = namespaces.commit().await.unwrap();
	assert!(outcome.jobs.is_empty());

	namespaces
		.stage(NamespaceChange::Delete { id: 100, fallback: 0, maintain_prefix: true })
		.unwrap();
	let outcome = namespaces.commit().await.unwrap();

	// The talk namespace goes along, into the fallback's talk namespace
	let mut keys: Vec<_> = outcome.jobs.iter().map(|job| job.key.as_str()).collect();
	keys.sort_unstable();
	assert_eq!(keys, vec!["ns-migrate:wikidb:delete:100:0", "ns-migrate:wikidb:delete:101:1"]);
	assert!(outcome.jobs.iter().all(|job| job.kind == KIND_NAMESPACE_MIGRATE));

	let tasks = app
		.adapter
		.list_tasks(ListTaskOptions {
			status: Some(vec!['P', 'F', 'E']),
			kind: Some(KIND_NAMESPACE_MIGRATE.into()),
		})
		.await
		.unwrap();
	assert_eq!(tasks.len(), 2);

	let record = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(record.namespaces.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
}

// Permissions
//*************

#[tokio::test]
async fn test_permission_rules() {
	let temp = TempDir::new().unwrap();
	let app = create_app(&temp).await;
	let registry = create_tenant(&app).await;
	let mut permissions = registry.permissions(&tenant(), admin()).await.unwrap();

	let res = permissions.stage(PermissionChange::Delete("sysop".into()));
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));

	let mut perms = GroupPermissions::with_rights(["edit"]);
	perms.add_groups.insert("ghost".into());
	let res = permissions.stage(PermissionChange::Upsert { group: "editor".into(), perms });
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));

	permissions
		.stage(PermissionChange::Upsert {
			group: "editor".into(),
			perms: GroupPermissions::with_rights(["edit"]),
		})
		.unwrap();
	let mut manager = GroupPermissions::with_rights(["read"]);
	manager.add_groups.insert("editor".into());
	permissions.stage(PermissionChange::Upsert { group: "manager".into(), perms: manager }).unwrap();
	permissions.commit().await.unwrap();

	let res = permissions.stage(PermissionChange::Delete("editor".into()));
	assert!(matches!(res, Err(Error::ConstraintViolation(_))));

	assert!(permissions.groups_with("edit").contains(&"editor".into()));
}

// Plugins
//*********

/// Counts extensions into the snapshot and refuses one sitename
#[derive(Debug)]
struct AuditPlugin;

#[async_trait]
impl ConfigPlugin for AuditPlugin {
	fn name(&self) -> &str {
		"audit"
	}

	async fn extend_snapshot(
		&self,
		record: &ConfigRecord,
		extra: &mut BTreeMap<Box<str>, serde_json::Value>,
	) -> Result<(), Error> {
		extra.insert("extensionCount".into(), serde_json::json!(record.extensions.len()));
		Ok(())
	}

	async fn before_commit(
		&self,
		_tenant: &TenantKey,
		candidate: &ConfigRecord,
		_diff: &ConfigDiff,
	) -> Result<(), Error> {
		if &*candidate.core.sitename == "Forbidden" {
			return Err(Error::ValidationError("sitename not allowed".into()));
		}
		Ok(())
	}
}

#[tokio::test]
async fn test_plugins() {
	let temp = TempDir::new().unwrap();
	let adapter = ConfigAdapterSqlite::new(temp.path()).await.expect("Failed to create adapter");
	let mut builder = AppBuilder::new();
	builder.config_adapter(Arc::new(adapter)).plugin(Arc::new(AuditPlugin));
	builder
		.catalog()
		.register_extension(ExtensionDefinition::builder("A").description("Base").build().unwrap())
		.unwrap();
	let app = builder.build().await.expect("Failed to build app");
	let registry = create_tenant(&app).await;

	let record = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(record.extra.get("extensionCount"), Some(&serde_json::json!(0)));

	let mut extensions = registry.extensions(&tenant(), admin()).await.unwrap();
	extensions.stage(ExtensionChange::Enable("A".into())).unwrap();
	extensions.commit().await.unwrap();
	let record = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(record.extra.get("extensionCount"), Some(&serde_json::json!(1)));

	let mut core = registry.core(&tenant(), admin()).await.unwrap();
	core.stage(CoreChange::Sitename("Forbidden".into())).unwrap();
	assert!(matches!(core.commit().await, Err(Error::ValidationError(_))));
	let record = registry.snapshot(&tenant()).await.unwrap();
	assert_eq!(&*record.core.sitename, "Wiki DB");
	assert_eq!(record.source_version, 1);
}

// vim: ts=4
