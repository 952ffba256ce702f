//! Migration coordinator
//!
//! Inspects a committed `ConfigDiff` and turns structural changes into
//! background jobs. `plan` is a pure function of the diff; `on_commit`
//! enqueues the plan on the scheduler. Every job carries a dedup key derived
//! from its parameters, so a repeated notification for the same change never
//! creates a second pending job.

use serde::{Deserialize, Serialize};

use crate::app::AppBuilderOpts;
use crate::catalog::Catalog;
use crate::prelude::*;
use crate::scheduler::RetryPolicy;
use farmconf_types::diff::{ConfigDiff, Domain};
use farmconf_types::types::{PageId, TaskId};

pub const KIND_NAMESPACE_MIGRATE: &str = "namespace.migrate";
pub const KIND_SETTINGS_SEED: &str = "settings.seed";
pub const KIND_SCRIPT_RUN: &str = "script.run";
pub const KIND_CACHE_PURGE: &str = "cache.purge";

// Job parameters //
//****************//
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationAction {
	/// Namespace removed, pages go to the fallback namespace
	Delete,
	/// Namespace renumbered
	Move,
	/// Namespace re-added, pages come back from the fallback namespace
	Restore,
}

impl MigrationAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			MigrationAction::Delete => "delete",
			MigrationAction::Move => "move",
			MigrationAction::Restore => "restore",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMigrationParams {
	pub tenant: TenantKey,
	pub action: MigrationAction,
	pub from: i32,
	pub to: i32,
	/// Name of the namespace the change is about (prefix for `maintain_prefix`)
	pub ns_name: Box<str>,
	#[serde(default)]
	pub maintain_prefix: bool,
	/// Last processed page id, set on continuation runs
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cursor: Option<PageId>,
	/// Pages that failed in earlier runs of the same migration
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub failed: Vec<PageId>,
}

impl NamespaceMigrationParams {
	pub fn dedup_key(&self) -> String {
		let key = format!(
			"ns-migrate:{}:{}:{}:{}",
			self.tenant,
			self.action.as_str(),
			self.from,
			self.to
		);
		match self.cursor {
			Some(cursor) => format!("{}@{}", key, cursor),
			None => key,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSeedParams {
	pub tenant: TenantKey,
	pub extension: Box<str>,
}

impl SettingsSeedParams {
	pub fn dedup_key(&self) -> String {
		format!("settings-seed:{}:{}", self.tenant, self.extension)
	}
}

/// A maintenance command, optionally followed by one more command if it fails
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAction {
	pub script: Box<str>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub args: Vec<Box<str>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub follow_up: Option<Box<ScriptAction>>,
}

impl ScriptAction {
	pub fn new(script: impl Into<Box<str>>) -> Self {
		Self { script: script.into(), args: Vec::new(), follow_up: None }
	}

	pub fn arg(mut self, arg: impl Into<Box<str>>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn on_failure(mut self, follow_up: ScriptAction) -> Self {
		self.follow_up = Some(Box::new(follow_up));
		self
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptParams {
	pub tenant: TenantKey,
	/// Extension (or other origin) the script belongs to
	pub origin: Box<str>,
	pub action: ScriptAction,
}

impl ScriptParams {
	/// `script:{tenant}:{origin}:{script}`, followed by `:` and the JSON argument list if there is one
	pub fn dedup_key(&self) -> String {
		let key = format!("script:{}:{}:{}", self.tenant, self.origin, self.action.script);
		if self.action.args.is_empty() {
			key
		} else {
			format!("{}:{}", key, serde_json::to_string(&self.action.args).unwrap_or_default())
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePurgeParams {
	pub tenant: TenantKey,
	pub url: Box<str>,
}

impl CachePurgeParams {
	pub fn dedup_key(&self) -> String {
		format!("cache-purge:{}", self.tenant)
	}
}

// Planning //
//**********//
/// One job to enqueue: kind, dedup key, serialized parameters and retry policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRequest {
	pub kind: &'static str,
	pub key: String,
	pub input: String,
	pub retry: Option<RetryPolicy>,
}

impl JobRequest {
	fn new<P: Serialize>(
		kind: &'static str,
		key: String,
		params: &P,
		retry: Option<RetryPolicy>,
	) -> ClResult<Self> {
		Ok(Self { kind, key, input: serde_json::to_string(params)?, retry })
	}

	pub fn namespace_migration(params: &NamespaceMigrationParams) -> ClResult<Self> {
		Self::new(
			KIND_NAMESPACE_MIGRATE,
			params.dedup_key(),
			params,
			Some(RetryPolicy::new((30, 3600), 5)),
		)
	}

	pub fn settings_seed(params: &SettingsSeedParams) -> ClResult<Self> {
		Self::new(KIND_SETTINGS_SEED, params.dedup_key(), params, Some(RetryPolicy::new((30, 600), 5)))
	}

	/// Scripts are not retried; a failure runs the follow-up instead
	pub fn script(params: &ScriptParams) -> ClResult<Self> {
		Self::new(KIND_SCRIPT_RUN, params.dedup_key(), params, None)
	}

	pub fn cache_purge(params: &CachePurgeParams) -> ClResult<Self> {
		Self::new(KIND_CACHE_PURGE, params.dedup_key(), params, Some(RetryPolicy::new((10, 300), 3)))
	}
}

/// Jobs required by a committed diff
pub fn plan(
	tenant: &TenantKey,
	diff: &ConfigDiff,
	catalog: &Catalog,
	opts: &AppBuilderOpts,
) -> ClResult<Vec<JobRequest>> {
	let mut jobs = Vec::new();

	let ns_job = |action, from, to, ns_name: &str, maintain_prefix| {
		JobRequest::namespace_migration(&NamespaceMigrationParams {
			tenant: tenant.clone(),
			action,
			from,
			to,
			ns_name: ns_name.into(),
			maintain_prefix,
			cursor: None,
			failed: Vec::new(),
		})
	};
	for (id, removal) in &diff.namespaces.removed {
		jobs.push(ns_job(
			MigrationAction::Delete,
			*id,
			removal.fallback,
			&*removal.def.name,
			removal.maintain_prefix,
		)?);
	}
	for mv in &diff.namespaces.moved {
		jobs.push(ns_job(MigrationAction::Move, mv.from, mv.to, &*mv.def.name, false)?);
	}
	for (id, restore) in &diff.namespaces.restored {
		jobs.push(ns_job(MigrationAction::Restore, restore.fallback, *id, &*restore.def.name, false)?);
	}

	for ext in &diff.extensions.added {
		let Some(def) = catalog.extension(ext) else {
			warn!(tenant = %tenant, "Enabled extension {} is not in the catalog", ext);
			continue;
		};
		if !def.default_settings.is_empty() {
			jobs.push(JobRequest::settings_seed(&SettingsSeedParams {
				tenant: tenant.clone(),
				extension: ext.clone(),
			})?);
		}
		for action in &def.install_scripts {
			jobs.push(JobRequest::script(&ScriptParams {
				tenant: tenant.clone(),
				origin: ext.clone(),
				action: action.clone(),
			})?);
		}
	}

	let domains = diff.domains();
	let visible = [Domain::Core, Domain::Extensions, Domain::Settings];
	if !opts.edge_nodes.is_empty() && visible.iter().any(|d| domains.contains(d)) {
		jobs.push(JobRequest::cache_purge(&CachePurgeParams {
			tenant: tenant.clone(),
			url: opts.tenant_url(tenant).into(),
		})?);
	}

	Ok(jobs)
}

/// A job enqueued after a commit
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EnqueuedJob {
	pub kind: &'static str,
	pub key: String,
	pub task_id: TaskId,
}

/// Enqueue the jobs a committed diff requires
///
/// Enqueue failures are logged and skipped: the commit already happened and
/// must not be reported as failed because of a follow-up job.
pub async fn on_commit(app: &App, tenant: &TenantKey, diff: &ConfigDiff) -> Vec<EnqueuedJob> {
	let jobs = match plan(tenant, diff, &app.catalog, &app.opts) {
		Ok(jobs) => jobs,
		Err(e) => {
			error!(tenant = %tenant, "Cannot plan follow-up jobs: {}", e);
			return Vec::new();
		}
	};

	let mut enqueued = Vec::with_capacity(jobs.len());
	for job in jobs {
		match app.scheduler.enqueue(job.kind, Some(&job.key), &job.input, job.retry).await {
			Ok(task_id) => {
				info!(tenant = %tenant, task_id, "Enqueued {} job {}", job.kind, job.key);
				enqueued.push(EnqueuedJob { kind: job.kind, key: job.key, task_id });
			}
			Err(e) => error!(tenant = %tenant, "Failed to enqueue {} job {}: {}", job.kind, job.key, e),
		}
	}
	enqueued
}


// vim: ts=4
