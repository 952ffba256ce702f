//! Settings domain
//!
//! The record only holds tenant overrides. Reads resolve the effective value
//! against the catalog default; settings guarded by a `restricted` right are
//! hidden from callers that lack it. Visibility is decided on every read and
//! never stored in the record.

use serde::Serialize;
use std::sync::Arc;

use super::{Candidate, Caller, DomainModule, ModuleState, activation_violations, check_violations};
use crate::catalog::SettingDefinition;
use crate::dependency::{self, Subject};
use crate::prelude::*;
use farmconf_types::diff::Domain;
use farmconf_types::record::{ConfigRecord, SettingValue};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingChange {
	Set { key: Box<str>, value: SettingValue },
	/// Drop the override, the setting falls back to its default
	Reset(Box<str>),
}

/// Effective value of a setting as seen by the caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettingView {
	pub key: Box<str>,
	pub value: SettingValue,
	/// False if the value comes from the catalog default
	pub overridden: bool,
}

#[derive(Debug)]
pub struct SettingsModule {
	state: ModuleState<SettingChange>,
}

impl SettingsModule {
	pub fn new(app: App, caller: Caller, base: Arc<ConfigRecord>) -> Self {
		Self { state: ModuleState::new(app, caller, base) }
	}

	/// Effective value of a setting, regardless of overrides
	pub fn effective(&self, key: &str) -> Option<SettingValue> {
		self.get(key).map(|view| view.value)
	}

	fn visible(&self, def: Option<&SettingDefinition>) -> bool {
		def.and_then(|def| def.restricted.as_deref())
			.is_none_or(|right| self.state.caller.has_right(right))
	}

	fn check_restricted(&self, key: &str, def: &SettingDefinition) -> ClResult<()> {
		match def.restricted.as_deref() {
			Some(right) if !self.state.caller.has_right(right) => {
				warn!(
					tenant = %self.state.tenant,
					caller = %self.state.caller.name,
					"Restricted setting {} needs right {}",
					key,
					right
				);
				Err(Error::PermissionDenied)
			}
			_ => Ok(()),
		}
	}

	fn check_dependencies(&self, candidate: &Candidate, key: &str, def: Option<&SettingDefinition>) -> ClResult<()> {
		let catalog = &self.state.app.catalog;
		let record = &candidate.record;
		let subject = Subject::Setting(key);

		let mut violations = Vec::new();
		let active = dependency::is_active(subject, record, catalog);
		if active {
			violations.extend(activation_violations(
				subject,
				def.and_then(|def| def.requires.as_ref()),
				record,
				catalog,
			));
		}
		for (_, other) in dependency::broken_dependents(subject, record, catalog) {
			violations.push(if active {
				Violation::Conflict { subject: key.into(), with: other }
			} else {
				Violation::Dependent { subject: key.into(), dependent: other }
			});
		}
		check_violations(violations)
	}
}

impl DomainModule for SettingsModule {
	const DOMAIN: Domain = Domain::Settings;

	type Id = str;
	type Item = SettingView;
	type Change = SettingChange;

	fn state(&self) -> &ModuleState<SettingChange> {
		&self.state
	}

	fn state_mut(&mut self) -> &mut ModuleState<SettingChange> {
		&mut self.state
	}

	/// Overrides plus defaults of every concrete catalog setting visible to the caller
	fn list(&self) -> Vec<SettingView> {
		let catalog = &self.state.app.catalog;
		let record = &self.state.base;

		let mut views: Vec<SettingView> = record
			.settings
			.iter()
			.filter(|(key, _)| self.visible(catalog.setting(key)))
			.map(|(key, value)| SettingView { key: key.clone(), value: value.clone(), overridden: true })
			.collect();
		views.extend(
			catalog
				.settings()
				.filter(|def| !def.is_wildcard() && !record.settings.contains_key(&def.key))
				.filter(|def| self.visible(Some(def)))
				.map(|def| SettingView {
					key: def.key.clone(),
					value: def.default.clone(),
					overridden: false,
				}),
		);
		views.sort_by(|a, b| a.key.cmp(&b.key));
		views
	}

	fn get(&self, key: &str) -> Option<SettingView> {
		let catalog = &self.state.app.catalog;
		let def = catalog.setting(key);
		if !self.visible(def) {
			return None;
		}
		match self.state.base.settings.get(key) {
			Some(value) => Some(SettingView { key: key.into(), value: value.clone(), overridden: true }),
			None => def.map(|def| SettingView {
				key: key.into(),
				value: def.default.clone(),
				overridden: false,
			}),
		}
	}

	fn apply(&self, candidate: &mut Candidate, change: &SettingChange) -> ClResult<()> {
		let catalog = &self.state.app.catalog;
		match change {
			SettingChange::Set { key, value } => {
				let Some(def) = catalog.setting(key) else {
					return Err(Error::ValidationError(format!("Unknown setting: {}", key)));
				};
				self.check_restricted(key, def)?;
				def.validate(value)?;
				candidate.record.settings.insert(key.clone(), value.clone());
				self.check_dependencies(candidate, key, Some(def))
			}
			SettingChange::Reset(key) => {
				let def = catalog.setting(key);
				if let Some(def) = def {
					self.check_restricted(key, def)?;
				}
				if candidate.record.settings.remove(key).is_none() {
					return Ok(());
				}
				self.check_dependencies(candidate, key, def)
			}
		}
	}
}

// vim: ts=4
