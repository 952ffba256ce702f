//! Extensions domain

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Candidate, Caller, DomainModule, ModuleState, activation_violations, check_violations};
use crate::dependency::{self, PredicateKind, Subject};
use crate::prelude::*;
use farmconf_types::diff::Domain;
use farmconf_types::record::ConfigRecord;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtensionChange {
	Enable(Box<str>),
	/// Rejected while enabled extensions or active settings require the extension
	Disable(Box<str>),
	/// Also disables dependent extensions and resets dependent setting overrides
	DisableCascade(Box<str>),
}

#[derive(Debug)]
pub struct ExtensionsModule {
	state: ModuleState<ExtensionChange>,
}

impl ExtensionsModule {
	pub fn new(app: App, caller: Caller, base: Arc<ConfigRecord>) -> Self {
		Self { state: ModuleState::new(app, caller, base) }
	}

	/// Catalog extensions not enabled for the tenant
	pub fn available(&self) -> Vec<Box<str>> {
		let mut ids: Vec<Box<str>> = self
			.state
			.app
			.catalog
			.extensions()
			.filter(|def| !self.state.base.has_extension(&def.id))
			.map(|def| def.id.clone())
			.collect();
		ids.sort();
		ids
	}

	fn enable(&self, candidate: &mut Candidate, id: &str) -> ClResult<()> {
		let catalog = &self.state.app.catalog;
		let Some(def) = catalog.extension(id) else {
			return Err(Error::ValidationError(format!("Unknown extension: {}", id)));
		};
		if !candidate.record.extensions.insert(id.into()) {
			return Ok(());
		}

		let record = &candidate.record;
		let subject = Subject::Extension(id);
		let mut violations = activation_violations(subject, def.requires.as_ref(), record, catalog);
		// Active subjects requiring this extension to be absent
		violations.extend(
			dependency::broken_dependents(subject, record, catalog)
				.into_iter()
				.map(|(_, with)| Violation::Conflict { subject: id.into(), with }),
		);
		check_violations(violations)
	}

	fn disable(&self, candidate: &mut Candidate, id: &str) -> ClResult<()> {
		if !candidate.record.extensions.remove(id) {
			return Ok(());
		}
		let violations = dependency::broken_dependents(
			Subject::Extension(id),
			&candidate.record,
			&self.state.app.catalog,
		)
		.into_iter()
		.map(|(_, dependent)| Violation::Dependent { subject: id.into(), dependent })
		.collect();
		check_violations(violations)
	}

	fn disable_cascade(&self, candidate: &mut Candidate, id: &str) -> ClResult<()> {
		let catalog = &self.state.app.catalog;
		if !candidate.record.has_extension(id) {
			return Ok(());
		}

		let mut visited: BTreeSet<(PredicateKind, Box<str>)> = BTreeSet::new();
		let mut worklist = vec![(PredicateKind::Extension, Box::<str>::from(id))];
		while let Some((kind, subject_id)) = worklist.pop() {
			if !visited.insert((kind, subject_id.clone())) {
				continue;
			}
			match kind {
				PredicateKind::Extension => {
					candidate.record.extensions.remove(&subject_id);
				}
				PredicateKind::Setting => {
					candidate.record.settings.remove(&subject_id);
				}
			}
			let subject = subject_of(kind, &subject_id);
			for dependent in dependency::broken_dependents(subject, &candidate.record, catalog) {
				if !visited.contains(&dependent) {
					debug!(tenant = %self.state.tenant, "Cascading {} to {:?}", id, dependent);
					worklist.push(dependent);
				}
			}
		}

		// A reset setting whose default is still truthy keeps depending on its requirement
		let mut violations = Vec::new();
		for (kind, subject_id) in &visited {
			let subject = subject_of(*kind, subject_id);
			for (_, dependent) in dependency::broken_dependents(subject, &candidate.record, catalog) {
				violations.push(Violation::Dependent { subject: subject_id.clone(), dependent });
			}
		}
		check_violations(violations)
	}
}

fn subject_of(kind: PredicateKind, id: &str) -> Subject<'_> {
	match kind {
		PredicateKind::Extension => Subject::Extension(id),
		PredicateKind::Setting => Subject::Setting(id),
	}
}

impl DomainModule for ExtensionsModule {
	const DOMAIN: Domain = Domain::Extensions;

	type Id = str;
	type Item = Box<str>;
	type Change = ExtensionChange;

	fn state(&self) -> &ModuleState<ExtensionChange> {
		&self.state
	}

	fn state_mut(&mut self) -> &mut ModuleState<ExtensionChange> {
		&mut self.state
	}

	fn list(&self) -> Vec<Box<str>> {
		self.state.base.extensions.iter().cloned().collect()
	}

	fn get(&self, id: &str) -> Option<Box<str>> {
		self.state.base.extensions.get(id).cloned()
	}

	fn apply(&self, candidate: &mut Candidate, change: &ExtensionChange) -> ClResult<()> {
		match change {
			ExtensionChange::Enable(id) => self.enable(candidate, id),
			ExtensionChange::Disable(id) => self.disable(candidate, id),
			ExtensionChange::DisableCascade(id) => self.disable_cascade(candidate, id),
		}
	}
}

// vim: ts=4
