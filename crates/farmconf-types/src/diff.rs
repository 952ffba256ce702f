//! Committed configuration changes
//!
//! A `ConfigDiff` is what a domain module hands to the persistence adapter
//! when committing, and what the migration coordinator inspects afterwards.
//! Each domain has its own section; a commit usually fills only one of them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::record::{CoreAttributes, GroupPermissions, NamespaceDef, SettingValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
	Core,
	Extensions,
	Namespaces,
	Permissions,
	Settings,
}

impl Domain {
	pub fn as_str(&self) -> &'static str {
		match self {
			Domain::Core => "core",
			Domain::Extensions => "extensions",
			Domain::Namespaces => "namespaces",
			Domain::Permissions => "permissions",
			Domain::Settings => "settings",
		}
	}

	/// Right a caller needs to stage changes in this domain
	pub fn manage_right(&self) -> &'static str {
		match self {
			Domain::Core => "manage-core",
			Domain::Extensions => "manage-extensions",
			Domain::Namespaces => "manage-namespaces",
			Domain::Permissions => "manage-permissions",
			Domain::Settings => "manage-settings",
		}
	}
}

impl std::fmt::Display for Domain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreDiff {
	pub before: CoreAttributes,
	pub after: CoreAttributes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionsDiff {
	pub added: BTreeSet<Box<str>>,
	pub removed: BTreeSet<Box<str>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDiff {
	/// New or changed overrides
	pub changed: BTreeMap<Box<str>, SettingValue>,
	/// Overrides removed (setting falls back to its default)
	pub reset: BTreeSet<Box<str>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRemoval {
	pub def: NamespaceDef,
	/// Namespace receiving the removed namespace's pages
	pub fallback: i32,
	/// Keep the `Name:` prefix in moved page titles
	pub maintain_prefix: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMove {
	pub from: i32,
	pub to: i32,
	pub def: NamespaceDef,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRestore {
	pub def: NamespaceDef,
	/// Namespace currently holding the pages that originated here
	pub fallback: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacesDiff {
	/// Added or re-attributed namespaces (no content migration)
	pub upserted: BTreeMap<i32, NamespaceDef>,
	pub removed: BTreeMap<i32, NamespaceRemoval>,
	pub moved: Vec<NamespaceMove>,
	/// Re-added namespaces whose previously migrated pages move back
	pub restored: BTreeMap<i32, NamespaceRestore>,
}

impl NamespacesDiff {
	pub fn is_empty(&self) -> bool {
		self.upserted.is_empty()
			&& self.removed.is_empty()
			&& self.moved.is_empty()
			&& self.restored.is_empty()
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsDiff {
	pub upserted: BTreeMap<Box<str>, GroupPermissions>,
	pub removed: BTreeSet<Box<str>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDiff {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub core: Option<CoreDiff>,
	#[serde(default)]
	pub extensions: ExtensionsDiff,
	#[serde(default)]
	pub settings: SettingsDiff,
	#[serde(default)]
	pub namespaces: NamespacesDiff,
	#[serde(default)]
	pub permissions: PermissionsDiff,
}

impl ConfigDiff {
	pub fn is_empty(&self) -> bool {
		self.core.is_none()
			&& self.extensions.added.is_empty()
			&& self.extensions.removed.is_empty()
			&& self.settings.changed.is_empty()
			&& self.settings.reset.is_empty()
			&& self.namespaces.is_empty()
			&& self.permissions.upserted.is_empty()
			&& self.permissions.removed.is_empty()
	}

	/// Domains touched by this diff
	pub fn domains(&self) -> BTreeSet<Domain> {
		let mut domains = BTreeSet::new();
		if self.core.is_some() {
			domains.insert(Domain::Core);
		}
		if !self.extensions.added.is_empty() || !self.extensions.removed.is_empty() {
			domains.insert(Domain::Extensions);
		}
		if !self.settings.changed.is_empty() || !self.settings.reset.is_empty() {
			domains.insert(Domain::Settings);
		}
		if !self.namespaces.is_empty() {
			domains.insert(Domain::Namespaces);
		}
		if !self.permissions.upserted.is_empty() || !self.permissions.removed.is_empty() {
			domains.insert(Domain::Permissions);
		}
		domains
	}
}


// vim: ts=4
