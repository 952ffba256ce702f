//! Configuration domain modules
//!
//! A domain module is bound to one tenant and one caller. It reads from the
//! snapshot it was hydrated with, stages changes on a private candidate copy
//! and writes them through the adapter's transactional commit on `commit`.
//!
//! Staging a change is all-or-nothing: the change is applied to a clone of the
//! candidate and validated there; only if it passes does the clone replace
//! the candidate. A rejected change leaves the pending changeset untouched.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::dependency::{self, Requirement, Subject};
use crate::migration::{self, EnqueuedJob};
use crate::prelude::*;
use farmconf_types::diff::{
	ConfigDiff, CoreDiff, Domain, NamespaceMove, NamespaceRemoval, NamespaceRestore,
};
use farmconf_types::record::ConfigRecord;

pub mod extensions;
pub mod namespaces;
pub mod permissions;
pub mod settings;
pub mod site;

pub use extensions::{ExtensionChange, ExtensionsModule};
pub use namespaces::{NamespaceChange, NamespacesModule};
pub use permissions::{PermissionChange, PermissionsModule};
pub use settings::{SettingChange, SettingView, SettingsModule};
pub use site::{CoreChange, CoreModule};

// Caller //
//********//
/// Who is staging changes, with the rights they hold
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
	pub name: Box<str>,
	pub rights: BTreeSet<Box<str>>,
	/// Internal caller (background jobs), holds every right
	pub system: bool,
}

impl Caller {
	pub fn new<I, S>(name: impl Into<Box<str>>, rights: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<Box<str>>,
	{
		Self { name: name.into(), rights: rights.into_iter().map(Into::into).collect(), system: false }
	}

	pub fn system() -> Self {
		Self { name: "system".into(), rights: BTreeSet::new(), system: true }
	}

	pub fn has_right(&self, right: &str) -> bool {
		self.system || self.rights.contains(right)
	}
}

// Candidate //
//***********//
/// Working copy of a record plus namespace intents that cannot be derived
/// from comparing two records (deletes with fallback, moves, restores)
#[derive(Clone, Debug)]
pub struct Candidate {
	pub record: ConfigRecord,
	pub ns_removed: BTreeMap<i32, NamespaceRemoval>,
	pub ns_moved: Vec<NamespaceMove>,
	pub ns_restored: BTreeMap<i32, NamespaceRestore>,
}

impl Candidate {
	pub fn new(record: ConfigRecord) -> Self {
		Self {
			record,
			ns_removed: BTreeMap::new(),
			ns_moved: Vec::new(),
			ns_restored: BTreeMap::new(),
		}
	}

	/// Whether a namespace id takes part in a pending delete, move or restore
	pub fn has_ns_intent(&self, id: i32) -> bool {
		self.ns_removed.contains_key(&id)
			|| self.ns_restored.contains_key(&id)
			|| self.ns_moved.iter().any(|mv| mv.from == id || mv.to == id)
	}
}

/// Diff between a bound record and a candidate
pub fn compute_diff(base: &ConfigRecord, candidate: &Candidate) -> ConfigDiff {
	let cand = &candidate.record;
	let mut diff = ConfigDiff::default();

	if base.core != cand.core {
		diff.core = Some(CoreDiff { before: base.core.clone(), after: cand.core.clone() });
	}

	diff.extensions.added = cand.extensions.difference(&base.extensions).cloned().collect();
	diff.extensions.removed = base.extensions.difference(&cand.extensions).cloned().collect();

	for (key, value) in &cand.settings {
		if base.settings.get(key) != Some(value) {
			diff.settings.changed.insert(key.clone(), value.clone());
		}
	}
	diff.settings.reset =
		base.settings.keys().filter(|key| !cand.settings.contains_key(*key)).cloned().collect();

	for (group, perms) in &cand.permissions {
		if base.permissions.get(group) != Some(perms) {
			diff.permissions.upserted.insert(group.clone(), perms.clone());
		}
	}
	diff.permissions.removed =
		base.permissions.keys().filter(|g| !cand.permissions.contains_key(*g)).cloned().collect();

	let move_targets: BTreeSet<i32> = candidate.ns_moved.iter().map(|mv| mv.to).collect();
	for (id, def) in &cand.namespaces {
		if move_targets.contains(id) || candidate.ns_restored.contains_key(id) {
			continue;
		}
		if base.namespaces.get(id) != Some(def) {
			diff.namespaces.upserted.insert(*id, def.clone());
		}
	}
	diff.namespaces.removed = candidate.ns_removed.clone();
	diff.namespaces.restored = candidate.ns_restored.clone();
	// Move targets carry the definition as it is at commit time
	diff.namespaces.moved = candidate
		.ns_moved
		.iter()
		.filter_map(|mv| {
			cand.namespaces.get(&mv.to).map(|def| NamespaceMove { def: def.clone(), ..mv.clone() })
		})
		.collect();

	diff
}

// Commit //
//********//
/// Result of a commit
#[derive(Clone, Debug, Serialize)]
pub struct CommitOutcome {
	/// `config_version` after the commit (unchanged for a no-op commit)
	pub source_version: u64,
	pub diff: ConfigDiff,
	pub jobs: Vec<EnqueuedJob>,
}

/// Tenant binding and pending changeset shared by every domain module
#[derive(Debug)]
pub struct ModuleState<C> {
	pub app: App,
	pub tenant: TenantKey,
	pub caller: Caller,
	pub base: Arc<ConfigRecord>,
	pub candidate: Candidate,
	pub staged: Vec<C>,
}

impl<C: Debug + Send> ModuleState<C> {
	pub fn new(app: App, caller: Caller, base: Arc<ConfigRecord>) -> Self {
		Self {
			app,
			tenant: base.tenant.clone(),
			caller,
			candidate: Candidate::new((*base).clone()),
			base,
			staged: Vec::new(),
		}
	}

	pub fn rollback(&mut self) {
		if !self.staged.is_empty() {
			debug!(tenant = %self.tenant, "Discarding {} staged change(s)", self.staged.len());
		}
		self.staged.clear();
		self.candidate = Candidate::new((*self.base).clone());
	}

	pub async fn commit(&mut self) -> ClResult<CommitOutcome> {
		let diff = compute_diff(&self.base, &self.candidate);
		if self.staged.is_empty() || diff.is_empty() {
			self.rollback();
			return Ok(CommitOutcome {
				source_version: self.base.source_version,
				diff: ConfigDiff::default(),
				jobs: Vec::new(),
			});
		}

		for plugin in self.app.plugins.iter() {
			if let Err(e) = plugin.before_commit(&self.tenant, &self.candidate.record, &diff).await {
				warn!(tenant = %self.tenant, "Plugin {} rejected commit: {}", plugin.name(), e);
				self.rollback();
				return Err(e);
			}
		}

		let source_version = match self.app.adapter.commit_changeset(&self.tenant, &diff).await {
			Ok(version) => version,
			Err(e) => {
				error!(tenant = %self.tenant, "Commit failed: {}", e);
				self.rollback();
				return Err(match e {
					e @ Error::TransactionFailure(_) => e,
					e => Error::TransactionFailure(e.to_string()),
				});
			}
		};
		info!(
			tenant = %self.tenant,
			caller = %self.caller.name,
			source_version,
			"Committed {} change(s) to {:?}",
			self.staged.len(),
			diff.domains()
		);

		// Storage has committed: jobs are planned even if the backend misbehaves
		if let Err(e) = self.app.cache.invalidate(&self.tenant).await {
			error!(tenant = %self.tenant, "Cannot drop cached snapshot, bypassing it: {}", e);
		}
		let jobs = migration::on_commit(&self.app, &self.tenant, &diff).await;

		// Rebind to the fresh snapshot
		self.base = self.app.cache.get(&self.tenant).await?;
		self.staged.clear();
		self.candidate = Candidate::new((*self.base).clone());

		Ok(CommitOutcome { source_version, diff, jobs })
	}
}

// DomainModule //
//**************//
#[async_trait]
pub trait DomainModule: Send {
	const DOMAIN: Domain;

	/// Identifier of one item in the domain
	type Id: ?Sized + Sync;
	type Item;
	type Change: Clone + Debug + Send + Sync;

	fn state(&self) -> &ModuleState<Self::Change>;
	fn state_mut(&mut self) -> &mut ModuleState<Self::Change>;

	fn list(&self) -> Vec<Self::Item>;
	fn get(&self, id: &Self::Id) -> Option<Self::Item>;

	/// Apply and validate a change on a candidate, without capability checks
	fn apply(&self, candidate: &mut Candidate, change: &Self::Change) -> ClResult<()>;

	/// Record the tenant is bound to
	fn record(&self) -> &ConfigRecord {
		&self.state().base
	}

	fn pending(&self) -> &[Self::Change] {
		&self.state().staged
	}

	/// Check the caller's right, validate the change and add it to the changeset
	fn stage(&mut self, change: Self::Change) -> ClResult<()> {
		let state = self.state();
		if !state.caller.has_right(Self::DOMAIN.manage_right()) {
			warn!(
				tenant = %state.tenant,
				caller = %state.caller.name,
				"Missing right {} to stage {:?}",
				Self::DOMAIN.manage_right(),
				change
			);
			return Err(Error::PermissionDenied);
		}

		let mut candidate = state.candidate.clone();
		self.apply(&mut candidate, &change).inspect_err(|e| {
			debug!(tenant = %state.tenant, "Rejected {:?}: {}", change, e);
		})?;

		let state = self.state_mut();
		state.candidate = candidate;
		state.staged.push(change);
		Ok(())
	}

	/// Diff the pending changeset would commit
	fn diff(&self) -> ConfigDiff {
		compute_diff(&self.state().base, &self.state().candidate)
	}

	async fn commit(&mut self) -> ClResult<CommitOutcome> {
		self.state_mut().commit().await
	}

	fn rollback(&mut self) {
		self.state_mut().rollback();
	}
}

/// Fail with `ConstraintViolation` if any violations were collected
pub(crate) fn check_violations(violations: Vec<Violation>) -> ClResult<()> {
	if violations.is_empty() {
		Ok(())
	} else {
		Err(Error::ConstraintViolation(violations.into_boxed_slice()))
	}
}

/// Requirement and conflict violations of an active subject
pub(crate) fn activation_violations(
	subject: Subject<'_>,
	requires: Option<&Requirement>,
	record: &ConfigRecord,
	catalog: &Catalog,
) -> Vec<Violation> {
	let mut violations: Vec<Violation> = requires
		.map(|expr| dependency::unmet(expr, record, catalog))
		.unwrap_or_default()
		.into_iter()
		.map(|pred| Violation::Unmet {
			subject: subject.id().into(),
			reference: pred.reference,
			negated: pred.negate,
		})
		.collect();
	violations.extend(
		dependency::conflicts_with(subject, record, catalog)
			.into_iter()
			.map(|with| Violation::Conflict { subject: subject.id().into(), with }),
	);
	violations
}

#[cfg(test)]
mod tests {
	use super::*;
	use farmconf_types::record::{CoreAttributes, NamespaceDef, SettingValue};

	fn base() -> ConfigRecord {
		let mut record =
			ConfigRecord::new(TenantKey::new("wikidb").unwrap(), CoreAttributes::new("W", "en"));
		record.namespaces.insert(100, NamespaceDef::new("Project"));
		record.settings.insert("wgLogo".into(), SettingValue::String("a.png".into()));
		record.extensions.insert("Echo".into());
		record
	}

	#[test]
	fn test_diff_of_identical_records_is_empty() {
		let base = base();
		assert!(compute_diff(&base, &Candidate::new(base.clone())).is_empty());
	}

	#[test]
	fn test_diff_collects_changes() {
		let base = base();
		let mut candidate = Candidate::new(base.clone());
		candidate.record.extensions.remove("Echo");
		candidate.record.extensions.insert("Flow".into());
		candidate.record.settings.remove("wgLogo");
		candidate.record.settings.insert("wgEnableUploads".into(), SettingValue::Bool(true));
		candidate.record.core.sitename = "Wiki".into();

		let diff = compute_diff(&base, &candidate);
		assert!(diff.core.is_some());
		assert_eq!(diff.extensions.added.iter().map(|e| &**e).collect::<Vec<_>>(), vec!["Flow"]);
		assert_eq!(diff.extensions.removed.iter().map(|e| &**e).collect::<Vec<_>>(), vec!["Echo"]);
		assert!(diff.settings.changed.contains_key("wgEnableUploads"));
		assert!(diff.settings.reset.contains("wgLogo"));
	}

	#[test]
	fn test_diff_move_is_not_an_upsert() {
		let base = base();
		let mut candidate = Candidate::new(base.clone());
		let def = candidate.record.namespaces.remove(&100).unwrap();
		candidate.record.namespaces.insert(102, def.clone());
		candidate.ns_moved.push(NamespaceMove { from: 100, to: 102, def });

		let diff = compute_diff(&base, &candidate);
		assert!(diff.namespaces.upserted.is_empty());
		assert_eq!(diff.namespaces.moved.len(), 1);
		assert!(candidate.has_ns_intent(102));
		assert!(!candidate.has_ns_intent(0));
	}

	#[test]
	fn test_caller_rights() {
		let caller = Caller::new("Admin", ["manage-settings"]);
		assert!(caller.has_right("manage-settings"));
		assert!(!caller.has_right("manage-core"));
		assert!(Caller::system().has_right("anything"));
	}
}

// vim: ts=4
