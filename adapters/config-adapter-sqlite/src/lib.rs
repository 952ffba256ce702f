//! SQLite-backed `ConfigAdapter` for farmconf.
//!
//! One database file holds every tenant's configuration rows, the page table
//! migrations operate on and the scheduler's task queue.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

mod config;
mod page;
mod schema;
mod task;
mod tenant;
mod utils;

use async_trait::async_trait;
use sqlx::sqlite::{self, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use farmconf_types::config_adapter::{
	ConfigAdapter, CreateTenantData, ListTaskOptions, Page, PageMove, PageSelector, RecentChange,
	Task, TaskPatch, TenantRow,
};
use farmconf_types::diff::ConfigDiff;
use farmconf_types::prelude::*;
use farmconf_types::record::{GroupPermissions, NamespaceDef, SettingValue};
use farmconf_types::types::{PageId, TaskId};

const DB_FILE: &str = "config.db";

#[derive(Debug)]
pub struct ConfigAdapterSqlite {
	db: SqlitePool,
}

impl ConfigAdapterSqlite {
	/// Open (or create) the database in `dir`
	pub async fn new(dir: impl AsRef<Path>) -> ClResult<Self> {
		let dir = dir.as_ref();
		tokio::fs::create_dir_all(dir).await?;

		let opts = sqlite::SqliteConnectOptions::new()
			.filename(dir.join(DB_FILE))
			.create_if_missing(true)
			.journal_mode(sqlite::SqliteJournalMode::Wal);
		let db = sqlite::SqlitePoolOptions::new()
			.max_connections(5)
			.connect_with(opts)
			.await
			.inspect_err(|err| error!("Cannot open config database: {:#?}", err))
			.map_err(|_| Error::DbError)?;

		schema::init_db(&db)
			.await
			.inspect_err(|err| error!("Cannot initialize config database: {:#?}", err))
			.map_err(|_| Error::DbError)?;

		info!("Config database opened in {}", dir.display());
		Ok(Self { db })
	}
}

#[async_trait]
impl ConfigAdapter for ConfigAdapterSqlite {
	// Tenants
	//*********
	async fn create_tenant(&self, tenant: &TenantKey, data: CreateTenantData<'_>) -> ClResult<()> {
		tenant::create(&self.db, tenant, &data).await
	}

	async fn read_tenant(&self, tenant: &TenantKey) -> ClResult<TenantRow> {
		tenant::read(&self.db, tenant).await
	}

	async fn list_tenants(&self) -> ClResult<Vec<TenantKey>> {
		tenant::list(&self.db).await
	}

	// Configuration domains
	//***********************
	async fn read_extensions(&self, tenant: &TenantKey) -> ClResult<Vec<Box<str>>> {
		config::read_extensions(&self.db, tenant).await
	}

	async fn list_settings(
		&self,
		tenant: &TenantKey,
	) -> ClResult<BTreeMap<Box<str>, SettingValue>> {
		config::list_settings(&self.db, tenant).await
	}

	async fn list_namespaces(&self, tenant: &TenantKey) -> ClResult<BTreeMap<i32, NamespaceDef>> {
		config::list_namespaces(&self.db, tenant).await
	}

	async fn list_permissions(
		&self,
		tenant: &TenantKey,
	) -> ClResult<BTreeMap<Box<str>, GroupPermissions>> {
		config::list_permissions(&self.db, tenant).await
	}

	async fn commit_changeset(&self, tenant: &TenantKey, diff: &ConfigDiff) -> ClResult<u64> {
		config::commit(&self.db, tenant, diff).await
	}

	// Pages
	//*******
	async fn create_page(
		&self,
		tenant: &TenantKey,
		namespace: i32,
		title: &str,
	) -> ClResult<PageId> {
		page::create(&self.db, tenant, namespace, title).await
	}

	async fn read_page(&self, tenant: &TenantKey, page_id: PageId) -> ClResult<Page> {
		page::read(&self.db, tenant, page_id).await
	}

	async fn page_exists(&self, tenant: &TenantKey, namespace: i32, title: &str) -> ClResult<bool> {
		page::exists(&self.db, tenant, namespace, title).await
	}

	async fn list_migration_pages(
		&self,
		tenant: &TenantKey,
		selector: PageSelector,
		after: Option<PageId>,
		limit: u32,
	) -> ClResult<Vec<Page>> {
		page::list_for_migration(&self.db, tenant, selector, after, limit).await
	}

	async fn move_page(&self, tenant: &TenantKey, page_id: PageId, mv: &PageMove) -> ClResult<()> {
		page::move_page(&self.db, tenant, page_id, mv).await
	}

	async fn list_recent_changes(
		&self,
		tenant: &TenantKey,
		page_id: PageId,
	) -> ClResult<Vec<RecentChange>> {
		page::list_recent_changes(&self.db, tenant, page_id).await
	}

	// Tasks
	//*******
	async fn list_tasks(&self, opts: ListTaskOptions) -> ClResult<Vec<Task>> {
		task::list(&self.db, &opts).await
	}

	async fn create_task(
		&self,
		kind: &'static str,
		key: Option<&str>,
		input: &str,
	) -> ClResult<TaskId> {
		task::create(&self.db, kind, key, input).await
	}

	async fn update_task_finished(&self, task_id: TaskId, output: &str) -> ClResult<()> {
		task::mark_finished(&self.db, task_id, output).await
	}

	async fn update_task_error(
		&self,
		task_id: TaskId,
		output: &str,
		next_at: Option<Timestamp>,
	) -> ClResult<()> {
		task::mark_error(&self.db, task_id, output, next_at).await
	}

	async fn find_task_by_key(&self, key: &str) -> ClResult<Option<Task>> {
		task::find_by_key(&self.db, key).await
	}

	async fn update_task(&self, task_id: TaskId, patch: &TaskPatch) -> ClResult<()> {
		task::update(&self.db, task_id, patch).await
	}
}

// vim: ts=4
