//! Tenant configuration snapshot
//!
//! A `ConfigRecord` is the immutable, fully assembled configuration of one
//! tenant. Records are shared as `Arc<ConfigRecord>`; write paths never
//! mutate a record in place, they commit a diff and let the cache rebuild.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ClResult, Error};
use crate::types::TenantKey;

/// Id of the main namespace, which always exists
pub const NS_MAIN: i32 = 0;

/// Tenant state flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WikiState {
	Closed,
	Private,
	Inactive,
	InactiveExempt,
	Locked,
	Deleted,
}

impl WikiState {
	pub const ALL: [WikiState; 6] = [
		WikiState::Closed,
		WikiState::Private,
		WikiState::Inactive,
		WikiState::InactiveExempt,
		WikiState::Locked,
		WikiState::Deleted,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			WikiState::Closed => "closed",
			WikiState::Private => "private",
			WikiState::Inactive => "inactive",
			WikiState::InactiveExempt => "inactive-exempt",
			WikiState::Locked => "locked",
			WikiState::Deleted => "deleted",
		}
	}
}

impl std::str::FromStr for WikiState {
	type Err = Error;

	fn from_str(s: &str) -> ClResult<Self> {
		WikiState::ALL
			.into_iter()
			.find(|state| state.as_str() == s)
			.ok_or_else(|| Error::ValidationError(format!("Unknown wiki state: {}", s)))
	}
}

/// Core attributes of a tenant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreAttributes {
	pub sitename: Box<str>,
	pub language: Box<str>,
	#[serde(default)]
	pub states: BTreeSet<WikiState>,
}

impl CoreAttributes {
	pub fn new(sitename: impl Into<Box<str>>, language: impl Into<Box<str>>) -> Self {
		Self { sitename: sitename.into(), language: language.into(), states: BTreeSet::new() }
	}

	pub fn has_state(&self, state: WikiState) -> bool {
		self.states.contains(&state)
	}
}

/// Setting value types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)] // No type tag - type inferred from SettingDefinition
pub enum SettingValue {
	Bool(bool), // Must be before Int to avoid bool -> int coercion
	Int(i64),
	String(String),
	List(Vec<String>),
	/// Row key to list of column keys
	Matrix(BTreeMap<String, Vec<String>>),
}

impl SettingValue {
	/// Truthiness used by requirement predicates
	pub fn is_truthy(&self) -> bool {
		match self {
			SettingValue::Bool(b) => *b,
			SettingValue::Int(i) => *i != 0,
			SettingValue::String(s) => !s.is_empty(),
			SettingValue::List(l) => !l.is_empty(),
			SettingValue::Matrix(m) => !m.is_empty(),
		}
	}

	/// Check if this value matches the type of another value
	pub fn matches_type(&self, other: &SettingValue) -> bool {
		matches!(
			(self, other),
			(SettingValue::Bool(_), SettingValue::Bool(_))
				| (SettingValue::Int(_), SettingValue::Int(_))
				| (SettingValue::String(_), SettingValue::String(_))
				| (SettingValue::List(_), SettingValue::List(_))
				| (SettingValue::Matrix(_), SettingValue::Matrix(_))
		)
	}

	/// Get the type name for error messages
	pub fn type_name(&self) -> &'static str {
		match self {
			SettingValue::Bool(_) => "bool",
			SettingValue::Int(_) => "int",
			SettingValue::String(_) => "string",
			SettingValue::List(_) => "list",
			SettingValue::Matrix(_) => "matrix",
		}
	}
}

/// Namespace definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDef {
	pub name: Box<str>,
	pub content_model: Box<str>,
	pub searchable: bool,
	pub subpages: bool,
	/// Right required to edit pages in this namespace
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub protection: Option<Box<str>>,
}

impl NamespaceDef {
	pub const DEFAULT_CONTENT_MODEL: &'static str = "wikitext";

	pub fn new(name: impl Into<Box<str>>) -> Self {
		Self {
			name: name.into(),
			content_model: Self::DEFAULT_CONTENT_MODEL.into(),
			searchable: true,
			subpages: false,
			protection: None,
		}
	}

	pub fn with_subpages(mut self, subpages: bool) -> Self {
		self.subpages = subpages;
		self
	}

	pub fn with_protection(mut self, right: impl Into<Box<str>>) -> Self {
		self.protection = Some(right.into());
		self
	}

	pub fn with_content_model(mut self, model: impl Into<Box<str>>) -> Self {
		self.content_model = model.into();
		self
	}
}

/// Permission group definition
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermissions {
	#[serde(default)]
	pub rights: BTreeSet<Box<str>>,
	/// Groups members of this group may add users to
	#[serde(default)]
	pub add_groups: BTreeSet<Box<str>>,
	/// Groups members of this group may remove users from
	#[serde(default)]
	pub remove_groups: BTreeSet<Box<str>>,
}

impl GroupPermissions {
	pub fn with_rights<I, S>(rights: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<Box<str>>,
	{
		Self { rights: rights.into_iter().map(Into::into).collect(), ..Default::default() }
	}
}

/// Full configuration snapshot of one tenant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
	pub tenant: TenantKey,
	pub core: CoreAttributes,
	pub extensions: BTreeSet<Box<str>>,
	/// Tenant overrides only; defaults live in the catalog
	pub settings: BTreeMap<Box<str>, SettingValue>,
	pub namespaces: BTreeMap<i32, NamespaceDef>,
	pub permissions: BTreeMap<Box<str>, GroupPermissions>,
	/// Keys appended by snapshot plugins
	#[serde(default)]
	pub extra: BTreeMap<Box<str>, serde_json::Value>,
	/// `config_version` of the source-of-truth row this record was built from
	pub source_version: u64,
	/// Build stamp, changes on every rebuild
	pub cache_version: u64,
}

impl ConfigRecord {
	/// Empty record with only the main namespace (used as a starting point by tests and
	/// provisioning)
	pub fn new(tenant: TenantKey, core: CoreAttributes) -> Self {
		let mut namespaces = BTreeMap::new();
		namespaces.insert(NS_MAIN, NamespaceDef::new("Main"));
		Self {
			tenant,
			core,
			extensions: BTreeSet::new(),
			settings: BTreeMap::new(),
			namespaces,
			permissions: BTreeMap::new(),
			extra: BTreeMap::new(),
			source_version: 0,
			cache_version: 0,
		}
	}

	pub fn has_extension(&self, id: &str) -> bool {
		self.extensions.contains(id)
	}

	pub fn setting(&self, key: &str) -> Option<&SettingValue> {
		self.settings.get(key)
	}

	pub fn namespace(&self, id: i32) -> Option<&NamespaceDef> {
		self.namespaces.get(&id)
	}

	/// Find a namespace id by name (case-insensitive)
	pub fn namespace_by_name(&self, name: &str) -> Option<i32> {
		self.namespaces
			.iter()
			.find(|(_, def)| def.name.eq_ignore_ascii_case(name))
			.map(|(id, _)| *id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_setting_value_truthiness() {
		assert!(SettingValue::Bool(true).is_truthy());
		assert!(!SettingValue::Bool(false).is_truthy());
		assert!(!SettingValue::Int(0).is_truthy());
		assert!(SettingValue::Int(-1).is_truthy());
		assert!(!SettingValue::String(String::new()).is_truthy());
		assert!(SettingValue::List(vec!["a".into()]).is_truthy());
		assert!(!SettingValue::Matrix(BTreeMap::new()).is_truthy());
	}

	#[test]
	fn test_setting_value_untagged() {
		let v: SettingValue = serde_json::from_str("true").unwrap();
		assert_eq!(v, SettingValue::Bool(true));
		let v: SettingValue = serde_json::from_str("42").unwrap();
		assert_eq!(v, SettingValue::Int(42));
		let v: SettingValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
		assert_eq!(v, SettingValue::List(vec!["a".into(), "b".into()]));
		let v: SettingValue = serde_json::from_str("{\"sysop\":[\"bureaucrat\"]}").unwrap();
		assert!(matches!(v, SettingValue::Matrix(ref m) if m["sysop"] == ["bureaucrat"]));
	}

	#[test]
	fn test_wiki_state_names() {
		for state in WikiState::ALL {
			assert_eq!(state.as_str().parse::<WikiState>().unwrap(), state);
		}
		let json = serde_json::to_string(&WikiState::InactiveExempt).unwrap();
		assert_eq!(json, "\"inactive-exempt\"");
	}

	#[test]
	fn test_namespace_by_name() {
		let mut record =
			ConfigRecord::new(TenantKey::new("wikidb").unwrap(), CoreAttributes::new("W", "en"));
		record.namespaces.insert(100, NamespaceDef::new("Project"));
		assert_eq!(record.namespace_by_name("project"), Some(100));
		assert_eq!(record.namespace_by_name("Help"), None);
	}
}

// vim: ts=4
