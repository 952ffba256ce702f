//! Namespaces domain
//!
//! Adding or re-attributing a namespace is a plain upsert. Renumbering
//! (`Move`), removal (`Delete`) and re-adding a removed id (`Restore`) are
//! recorded as intents on the candidate; after commit each intent becomes a
//! namespace migration job.
//!
//! Even ids are subject namespaces, odd ids their talk namespaces. Deleting a
//! subject namespace takes its talk namespace along.

use std::sync::Arc;

use super::{Candidate, Caller, DomainModule, ModuleState};
use crate::prelude::*;
use farmconf_types::diff::{Domain, NamespaceMove, NamespaceRemoval, NamespaceRestore};
use farmconf_types::record::{ConfigRecord, NS_MAIN, NamespaceDef};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceChange {
	/// Add a namespace or change its attributes
	Upsert { id: i32, def: NamespaceDef },
	/// Renumber a namespace, its pages follow
	Move { from: i32, to: i32 },
	/// Remove a namespace, its pages go to `fallback`
	Delete { id: i32, fallback: i32, maintain_prefix: bool },
	/// Re-add a removed namespace, pages that originated there come back from `fallback`
	Restore { id: i32, def: NamespaceDef, fallback: i32 },
}

#[derive(Debug)]
pub struct NamespacesModule {
	state: ModuleState<NamespaceChange>,
}

fn is_talk(id: i32) -> bool {
	id.rem_euclid(2) == 1
}

impl NamespacesModule {
	pub fn new(app: App, caller: Caller, base: Arc<ConfigRecord>) -> Self {
		Self { state: ModuleState::new(app, caller, base) }
	}

	pub fn by_name(&self, name: &str) -> Option<(i32, NamespaceDef)> {
		let id = self.state.base.namespace_by_name(name)?;
		self.get(&id)
	}

	fn validate_def(&self, record: &ConfigRecord, id: i32, def: &NamespaceDef) -> ClResult<()> {
		let name = def.name.trim();
		if name.is_empty() {
			return Err(Error::ValidationError("Namespace name cannot be empty".into()));
		}
		if name.len() != def.name.len() || name.contains(':') {
			return Err(Error::ValidationError(format!("Invalid namespace name: '{}'", def.name)));
		}
		if let Some(other) = record.namespace_by_name(name).filter(|other| *other != id) {
			return Err(Error::invariant(format!(
				"Namespace name '{}' is already used by namespace {}",
				name, other
			)));
		}
		if !self.state.app.catalog.has_content_model(&def.content_model) {
			return Err(Error::ValidationError(format!(
				"Unknown content model: {}",
				def.content_model
			)));
		}
		Ok(())
	}

	fn upsert(&self, candidate: &mut Candidate, id: i32, def: &NamespaceDef) -> ClResult<()> {
		if candidate.has_ns_intent(id) {
			return Err(Error::invariant(format!("Namespace {} has a pending structural change", id)));
		}
		self.validate_def(&candidate.record, id, def)?;
		candidate.record.namespaces.insert(id, def.clone());
		Ok(())
	}

	fn move_ns(&self, candidate: &mut Candidate, from: i32, to: i32) -> ClResult<()> {
		if from == NS_MAIN {
			return Err(Error::invariant("The main namespace cannot be moved"));
		}
		if from == to {
			return Err(Error::invariant(format!("Namespace {} cannot be moved onto itself", from)));
		}
		if is_talk(from) != is_talk(to) {
			return Err(Error::invariant(format!(
				"Namespace {} cannot be moved to {}: subject and talk ids cannot be swapped",
				from, to
			)));
		}
		if candidate.record.namespaces.contains_key(&to) {
			return Err(Error::invariant(format!("Namespace {} already exists", to)));
		}
		let blocked = candidate.ns_removed.contains_key(&from)
			|| candidate.ns_removed.contains_key(&to)
			|| candidate.ns_restored.contains_key(&from)
			|| candidate.ns_restored.contains_key(&to)
			|| candidate.ns_moved.iter().any(|mv| mv.from == from || (mv.from == to && mv.to != from));
		if blocked {
			return Err(Error::invariant(format!(
				"Namespace {} or {} has a pending structural change",
				from, to
			)));
		}
		let Some(def) = candidate.record.namespaces.remove(&from) else {
			return Err(Error::ValidationError(format!("Unknown namespace: {}", from)));
		};
		candidate.record.namespaces.insert(to, def.clone());

		// Moves of the same namespace compose; moving back cancels
		if let Some(pos) = candidate.ns_moved.iter().position(|mv| mv.to == from) {
			if candidate.ns_moved[pos].from == to {
				candidate.ns_moved.remove(pos);
			} else {
				candidate.ns_moved[pos].to = to;
			}
		} else {
			candidate.ns_moved.push(NamespaceMove { from, to, def });
		}
		Ok(())
	}

	fn delete(
		&self,
		candidate: &mut Candidate,
		id: i32,
		fallback: i32,
		maintain_prefix: bool,
	) -> ClResult<()> {
		if id == NS_MAIN {
			return Err(Error::invariant("The main namespace cannot be deleted"));
		}
		if id == fallback {
			return Err(Error::invariant(format!("Namespace {} cannot be its own fallback", id)));
		}
		if candidate.has_ns_intent(id) {
			return Err(Error::invariant(format!("Namespace {} has a pending structural change", id)));
		}
		let record = &candidate.record;
		if !record.namespaces.contains_key(&id) {
			return Err(Error::ValidationError(format!("Unknown namespace: {}", id)));
		}
		if !record.namespaces.contains_key(&fallback) {
			return Err(Error::invariant(format!("Fallback namespace {} does not exist", fallback)));
		}

		let talk = (!is_talk(id) && record.namespaces.contains_key(&(id + 1))).then_some(id + 1);
		if let Some(talk) = talk {
			if fallback == talk {
				return Err(Error::invariant(format!(
					"Namespace {} cannot fall back to its own talk namespace",
					id
				)));
			}
			if candidate.has_ns_intent(talk) {
				return Err(Error::invariant(format!(
					"Namespace {} has a pending structural change",
					talk
				)));
			}
		}
		let talk_fallback = if !is_talk(fallback) && record.namespaces.contains_key(&(fallback + 1)) {
			fallback + 1
		} else {
			fallback
		};

		for (ns, to) in std::iter::once((id, fallback)).chain(talk.map(|talk| (talk, talk_fallback))) {
			if let Some(def) = candidate.record.namespaces.remove(&ns) {
				candidate
					.ns_removed
					.insert(ns, NamespaceRemoval { def, fallback: to, maintain_prefix });
			}
		}
		Ok(())
	}

	fn restore(
		&self,
		candidate: &mut Candidate,
		id: i32,
		def: &NamespaceDef,
		fallback: i32,
	) -> ClResult<()> {
		if id == fallback {
			return Err(Error::invariant(format!("Namespace {} cannot be restored from itself", id)));
		}
		if candidate.record.namespaces.contains_key(&id) {
			return Err(Error::invariant(format!("Namespace {} already exists", id)));
		}
		if candidate.has_ns_intent(id) {
			return Err(Error::invariant(format!("Namespace {} has a pending structural change", id)));
		}
		if !candidate.record.namespaces.contains_key(&fallback) {
			return Err(Error::invariant(format!("Fallback namespace {} does not exist", fallback)));
		}
		self.validate_def(&candidate.record, id, def)?;
		candidate.record.namespaces.insert(id, def.clone());
		candidate.ns_restored.insert(id, NamespaceRestore { def: def.clone(), fallback });
		Ok(())
	}
}

impl DomainModule for NamespacesModule {
	const DOMAIN: Domain = Domain::Namespaces;

	type Id = i32;
	type Item = (i32, NamespaceDef);
	type Change = NamespaceChange;

	fn state(&self) -> &ModuleState<NamespaceChange> {
		&self.state
	}

	fn state_mut(&mut self) -> &mut ModuleState<NamespaceChange> {
		&mut self.state
	}

	fn list(&self) -> Vec<(i32, NamespaceDef)> {
		self.state.base.namespaces.iter().map(|(id, def)| (*id, def.clone())).collect()
	}

	fn get(&self, id: &i32) -> Option<(i32, NamespaceDef)> {
		self.state.base.namespace(*id).map(|def| (*id, def.clone()))
	}

	fn apply(&self, candidate: &mut Candidate, change: &NamespaceChange) -> ClResult<()> {
		match change {
			NamespaceChange::Upsert { id, def } => self.upsert(candidate, *id, def),
			NamespaceChange::Move { from, to } => self.move_ns(candidate, *from, *to),
			NamespaceChange::Delete { id, fallback, maintain_prefix } => {
				self.delete(candidate, *id, *fallback, *maintain_prefix)
			}
			NamespaceChange::Restore { id, def, fallback } => {
				self.restore(candidate, *id, def, *fallback)
			}
		}
	}
}


// vim: ts=4
