//! Adapter that persists the source of truth for tenant configuration, tenant pages and tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::{
	diff::ConfigDiff,
	prelude::*,
	record::{CoreAttributes, GroupPermissions, NamespaceDef, SettingValue},
	types::{PageId, TaskId},
};

/// Tenant row as stored in the source of truth
#[derive(Debug, Clone)]
pub struct TenantRow {
	pub tenant: TenantKey,
	pub core: CoreAttributes,
	/// Bumped by every committed changeset
	pub config_version: u64,
	pub created_at: Timestamp,
}

/// Initial content of a new tenant
#[derive(Debug)]
pub struct CreateTenantData<'a> {
	pub core: &'a CoreAttributes,
	pub namespaces: &'a BTreeMap<i32, NamespaceDef>,
	pub permissions: &'a BTreeMap<Box<str>, GroupPermissions>,
}

// Pages
//*******
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
	pub page_id: PageId,
	pub namespace: i32,
	pub title: Box<str>,
	/// Namespace the page lived in before its namespace was removed
	pub origin_namespace: Option<i32>,
	/// Title the page had before its namespace was removed
	pub origin_title: Option<Box<str>>,
}

/// Which pages a migration batch selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSelector {
	/// Pages currently in the namespace
	Namespace(i32),
	/// Pages whose recorded origin namespace is this one
	Origin(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginUpdate {
	Keep,
	Set { namespace: i32, title: Box<str> },
	Clear,
}

#[derive(Debug, Clone)]
pub struct PageMove {
	pub namespace: i32,
	pub title: Box<str>,
	pub origin: OriginUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentChange {
	pub rc_id: u64,
	pub page_id: PageId,
	pub namespace: i32,
	pub title: Box<str>,
	pub created_at: Timestamp,
}

// Tasks
//*******
#[derive(Debug, Clone)]
pub struct Task {
	pub task_id: TaskId,
	pub kind: Box<str>,
	pub key: Option<Box<str>>,
	/// 'P' pending, 'F' finished, 'E' error
	pub status: char,
	pub created_at: Timestamp,
	pub next_at: Option<Timestamp>,
	pub retry: Option<Box<str>>,
	pub input: Box<str>,
	pub output: Option<Box<str>>,
	pub error: Option<Box<str>>,
}

#[derive(Debug, Default)]
pub struct ListTaskOptions {
	/// Restrict to these statuses (default: pending only)
	pub status: Option<Vec<char>>,
	pub kind: Option<Box<str>>,
}

#[derive(Debug, Default)]
pub struct TaskPatch {
	pub input: Patch<String>,
	pub next_at: Patch<Timestamp>,
	pub retry: Patch<String>,
}

/// A farmconf configuration adapter
///
/// Every `ConfigAdapter` implementation is required to implement this trait.
/// It is the source of truth for tenant configuration and owns the transactional
/// commit boundary, the page table used by migrations and the task queue.
#[async_trait]
pub trait ConfigAdapter: Debug + Send + Sync {
	// Tenants
	//*********
	/// Creates a new tenant with its initial namespaces and permission groups
	async fn create_tenant(&self, tenant: &TenantKey, data: CreateTenantData<'_>) -> ClResult<()>;

	/// Reads a tenant row, `NotFound` if the tenant does not exist
	async fn read_tenant(&self, tenant: &TenantKey) -> ClResult<TenantRow>;

	async fn list_tenants(&self) -> ClResult<Vec<TenantKey>>;

	// Configuration domains
	//***********************
	async fn read_extensions(&self, tenant: &TenantKey) -> ClResult<Vec<Box<str>>>;
	async fn list_settings(&self, tenant: &TenantKey)
	-> ClResult<BTreeMap<Box<str>, SettingValue>>;
	async fn list_namespaces(&self, tenant: &TenantKey) -> ClResult<BTreeMap<i32, NamespaceDef>>;
	async fn list_permissions(
		&self,
		tenant: &TenantKey,
	) -> ClResult<BTreeMap<Box<str>, GroupPermissions>>;

	/// Applies a diff in one transaction and bumps the tenant's `config_version`
	///
	/// Returns the new `config_version`. On failure nothing is written and
	/// `TransactionFailure` is returned.
	async fn commit_changeset(&self, tenant: &TenantKey, diff: &ConfigDiff) -> ClResult<u64>;

	// Pages
	//*******
	async fn create_page(&self, tenant: &TenantKey, namespace: i32, title: &str)
	-> ClResult<PageId>;
	async fn read_page(&self, tenant: &TenantKey, page_id: PageId) -> ClResult<Page>;
	async fn page_exists(&self, tenant: &TenantKey, namespace: i32, title: &str) -> ClResult<bool>;

	/// Lists pages for migration, ordered by page id, strictly after `after`
	async fn list_migration_pages(
		&self,
		tenant: &TenantKey,
		selector: PageSelector,
		after: Option<PageId>,
		limit: u32,
	) -> ClResult<Vec<Page>>;

	/// Moves a page and mirrors the move into its recent changes, in one transaction
	async fn move_page(&self, tenant: &TenantKey, page_id: PageId, mv: &PageMove) -> ClResult<()>;

	async fn list_recent_changes(
		&self,
		tenant: &TenantKey,
		page_id: PageId,
	) -> ClResult<Vec<RecentChange>>;

	// Tasks
	//*******
	async fn list_tasks(&self, opts: ListTaskOptions) -> ClResult<Vec<Task>>;
	async fn create_task(&self, kind: &'static str, key: Option<&str>, input: &str)
	-> ClResult<TaskId>;
	async fn update_task_finished(&self, task_id: TaskId, output: &str) -> ClResult<()>;
	async fn update_task_error(
		&self,
		task_id: TaskId,
		output: &str,
		next_at: Option<Timestamp>,
	) -> ClResult<()>;
	/// Finds the newest pending task with the given dedup key
	async fn find_task_by_key(&self, key: &str) -> ClResult<Option<Task>>;
	async fn update_task(&self, task_id: TaskId, patch: &TaskPatch) -> ClResult<()>;
}

// vim: ts=4
