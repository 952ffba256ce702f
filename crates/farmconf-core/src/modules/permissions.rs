//! Permissions domain

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Candidate, Caller, DomainModule, ModuleState, check_violations};
use crate::prelude::*;
use farmconf_types::diff::Domain;
use farmconf_types::record::{ConfigRecord, GroupPermissions};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PermissionChange {
	Upsert { group: Box<str>, perms: GroupPermissions },
	GrantRights { group: Box<str>, rights: BTreeSet<Box<str>> },
	RevokeRights { group: Box<str>, rights: BTreeSet<Box<str>> },
	Delete(Box<str>),
}

#[derive(Debug)]
pub struct PermissionsModule {
	state: ModuleState<PermissionChange>,
}

impl PermissionsModule {
	pub fn new(app: App, caller: Caller, base: Arc<ConfigRecord>) -> Self {
		Self { state: ModuleState::new(app, caller, base) }
	}

	/// Groups holding a right
	pub fn groups_with(&self, right: &str) -> Vec<Box<str>> {
		self.state
			.base
			.permissions
			.iter()
			.filter(|(_, perms)| perms.rights.contains(right))
			.map(|(group, _)| group.clone())
			.collect()
	}
}

fn existing<'a>(
	candidate: &'a mut Candidate,
	group: &str,
) -> ClResult<&'a mut GroupPermissions> {
	candidate
		.record
		.permissions
		.get_mut(group)
		.ok_or_else(|| Error::ValidationError(format!("Unknown group: {}", group)))
}

fn validate_group_name(group: &str) -> ClResult<()> {
	if group.is_empty() || group.chars().any(char::is_whitespace) {
		return Err(Error::ValidationError(format!("Invalid group name: '{}'", group)));
	}
	Ok(())
}

impl DomainModule for PermissionsModule {
	const DOMAIN: Domain = Domain::Permissions;

	type Id = str;
	type Item = (Box<str>, GroupPermissions);
	type Change = PermissionChange;

	fn state(&self) -> &ModuleState<PermissionChange> {
		&self.state
	}

	fn state_mut(&mut self) -> &mut ModuleState<PermissionChange> {
		&mut self.state
	}

	fn list(&self) -> Vec<(Box<str>, GroupPermissions)> {
		self.state.base.permissions.iter().map(|(g, p)| (g.clone(), p.clone())).collect()
	}

	fn get(&self, group: &str) -> Option<(Box<str>, GroupPermissions)> {
		self.state.base.permissions.get_key_value(group).map(|(g, p)| (g.clone(), p.clone()))
	}

	fn apply(&self, candidate: &mut Candidate, change: &PermissionChange) -> ClResult<()> {
		match change {
			PermissionChange::Upsert { group, perms } => {
				validate_group_name(group)?;
				candidate.record.permissions.insert(group.clone(), perms.clone());

				let known = &candidate.record.permissions;
				let violations = perms
					.add_groups
					.iter()
					.chain(perms.remove_groups.iter())
					.filter(|other| !known.contains_key(*other))
					.map(|other| Violation::Unmet {
						subject: group.clone(),
						reference: other.clone(),
						negated: false,
					})
					.collect();
				check_violations(violations)
			}
			PermissionChange::GrantRights { group, rights } => {
				existing(candidate, group)?.rights.extend(rights.iter().cloned());
				Ok(())
			}
			PermissionChange::RevokeRights { group, rights } => {
				existing(candidate, group)?.rights.retain(|right| !rights.contains(right));
				Ok(())
			}
			PermissionChange::Delete(group) => {
				if self.state.app.catalog.is_permanent_group(group) {
					return Err(Error::invariant(format!("Group {} cannot be deleted", group)));
				}
				if candidate.record.permissions.remove(group).is_none() {
					return Err(Error::ValidationError(format!("Unknown group: {}", group)));
				}
				let violations = candidate
					.record
					.permissions
					.iter()
					.filter(|(_, perms)| {
						perms.add_groups.contains(group) || perms.remove_groups.contains(group)
					})
					.map(|(other, _)| Violation::Dependent {
						subject: group.clone(),
						dependent: other.clone(),
					})
					.collect();
				check_violations(violations)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_group_names() {
		assert!(validate_group_name("sysop").is_ok());
		assert!(validate_group_name("interface-admin").is_ok());
		assert!(validate_group_name("").is_err());
		assert!(validate_group_name("bad group").is_err());
	}
}

// vim: ts=4
