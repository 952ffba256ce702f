//! Core domain: sitename, language and state flags

use regex::Regex;
use std::sync::Arc;

use super::{Candidate, Caller, DomainModule, ModuleState};
use crate::prelude::*;
use farmconf_types::diff::Domain;
use farmconf_types::record::{ConfigRecord, CoreAttributes, WikiState};

const LANGUAGE_PATTERN: &str = "^[a-z]{2,3}(-[a-z0-9]+)*$";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreChange {
	Sitename(Box<str>),
	Language(Box<str>),
	SetState { state: WikiState, enabled: bool },
}

pub(crate) fn validate_sitename(sitename: &str) -> ClResult<()> {
	if sitename.trim().is_empty() {
		return Err(Error::ValidationError("Sitename cannot be empty".into()));
	}
	Ok(())
}

pub(crate) fn validate_language(language: &str) -> ClResult<()> {
	let re = Regex::new(LANGUAGE_PATTERN)
		.map_err(|e| Error::Internal(format!("Invalid language pattern: {}", e)))?;
	if !re.is_match(language) {
		return Err(Error::ValidationError(format!("Invalid language code: {}", language)));
	}
	Ok(())
}

/// State pairs that cannot be set together
const EXCLUSIVE_STATES: [(WikiState, WikiState); 1] =
	[(WikiState::Inactive, WikiState::InactiveExempt)];

#[derive(Debug)]
pub struct CoreModule {
	state: ModuleState<CoreChange>,
}

impl CoreModule {
	pub fn new(app: App, caller: Caller, base: Arc<ConfigRecord>) -> Self {
		Self { state: ModuleState::new(app, caller, base) }
	}

	pub fn attributes(&self) -> &CoreAttributes {
		&self.state.base.core
	}
}

impl DomainModule for CoreModule {
	const DOMAIN: Domain = Domain::Core;

	type Id = ();
	type Item = CoreAttributes;
	type Change = CoreChange;

	fn state(&self) -> &ModuleState<CoreChange> {
		&self.state
	}

	fn state_mut(&mut self) -> &mut ModuleState<CoreChange> {
		&mut self.state
	}

	fn list(&self) -> Vec<CoreAttributes> {
		vec![self.state.base.core.clone()]
	}

	fn get(&self, _id: &()) -> Option<CoreAttributes> {
		Some(self.state.base.core.clone())
	}

	fn apply(&self, candidate: &mut Candidate, change: &CoreChange) -> ClResult<()> {
		let core = &mut candidate.record.core;
		match change {
			CoreChange::Sitename(sitename) => {
				validate_sitename(sitename)?;
				core.sitename = sitename.trim().into();
			}
			CoreChange::Language(language) => {
				validate_language(language)?;
				core.language = language.clone();
			}
			CoreChange::SetState { state, enabled: true } => {
				for (a, b) in EXCLUSIVE_STATES {
					let other = if *state == a { b } else if *state == b { a } else { continue };
					if core.has_state(other) {
						return Err(Error::violation(Violation::Conflict {
							subject: state.as_str().into(),
							with: other.as_str().into(),
						}));
					}
				}
				core.states.insert(*state);
			}
			CoreChange::SetState { state, enabled: false } => {
				core.states.remove(state);
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_language_codes() {
		for code in ["en", "de", "zh-hans", "be-tarask", "nds-nl", "als"] {
			assert!(validate_language(code).is_ok(), "{}", code);
		}
		for code in ["", "e", "EN", "english", "en_GB", "en-"] {
			assert!(validate_language(code).is_err(), "{}", code);
		}
	}

	#[test]
	fn test_sitename() {
		assert!(validate_sitename("Wikifarm").is_ok());
		assert!(validate_sitename("   ").is_err());
	}
}

// vim: ts=4
