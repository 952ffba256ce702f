//! Extension and setting catalog
//!
//! The catalog describes everything a tenant may enable or override: extensions
//! with their requirements, conflicts, default settings and install scripts, and
//! settings with their defaults, validators and access restrictions. It is
//! assembled in a mutable `CatalogBuilder` during startup and frozen into an
//! immutable `Catalog` stored in `AppState`.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::path::Path;

use crate::dependency::{Predicate, Requirement};
use crate::migration::ScriptAction;
use crate::prelude::*;
use farmconf_types::record::{GroupPermissions, SettingValue};

/// Type alias for setting validator function
pub type SettingValidator = Box<dyn Fn(&SettingValue) -> ClResult<()> + Send + Sync>;

// ExtensionDefinition //
//*********************//
#[derive(Debug, Clone)]
pub struct ExtensionDefinition {
	pub id: Box<str>,
	pub description: Box<str>,
	pub requires: Option<Requirement>,
	pub conflicts: Vec<Predicate>,
	/// Settings applied by the seed job when the extension is enabled
	pub default_settings: BTreeMap<Box<str>, SettingValue>,
	/// Maintenance scripts run once when the extension is enabled
	pub install_scripts: Vec<ScriptAction>,
}

impl ExtensionDefinition {
	pub fn builder(id: impl Into<Box<str>>) -> ExtensionDefinitionBuilder {
		ExtensionDefinitionBuilder::new(id)
	}
}

pub struct ExtensionDefinitionBuilder {
	id: Box<str>,
	description: Option<Box<str>>,
	requires: Option<Requirement>,
	conflicts: Vec<Predicate>,
	default_settings: BTreeMap<Box<str>, SettingValue>,
	install_scripts: Vec<ScriptAction>,
}

impl ExtensionDefinitionBuilder {
	pub fn new(id: impl Into<Box<str>>) -> Self {
		Self {
			id: id.into(),
			description: None,
			requires: None,
			conflicts: Vec::new(),
			default_settings: BTreeMap::new(),
			install_scripts: Vec::new(),
		}
	}

	pub fn description(mut self, description: impl Into<Box<str>>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn requires(mut self, requirement: Requirement) -> Self {
		self.requires = Some(requirement);
		self
	}

	pub fn conflicts_with(mut self, predicate: Predicate) -> Self {
		self.conflicts.push(predicate);
		self
	}

	pub fn default_setting(mut self, key: impl Into<Box<str>>, value: SettingValue) -> Self {
		self.default_settings.insert(key.into(), value);
		self
	}

	pub fn install_script(mut self, action: ScriptAction) -> Self {
		self.install_scripts.push(action);
		self
	}

	pub fn build(self) -> ClResult<ExtensionDefinition> {
		if self.id.is_empty() {
			return Err(Error::ConfigError("Extension id is required".into()));
		}
		let description = self.description.ok_or_else(|| {
			Error::ConfigError(format!("Extension '{}' needs a description", self.id))
		})?;

		Ok(ExtensionDefinition {
			id: self.id,
			description,
			requires: self.requires,
			conflicts: self.conflicts,
			default_settings: self.default_settings,
			install_scripts: self.install_scripts,
		})
	}
}

// SettingDefinition //
//*******************//
/// Setting definition - defines metadata for each setting
pub struct SettingDefinition {
	/// Setting name, or a `prefix.*` wildcard
	pub key: Box<str>,

	/// Human-readable description
	pub description: Box<str>,

	/// Effective value while the tenant has no override; also fixes the type
	pub default: SettingValue,

	/// Condition that must hold while the setting is truthy
	pub requires: Option<Requirement>,

	pub conflicts: Vec<Predicate>,

	/// Right needed to read or change the setting
	pub restricted: Option<Box<str>>,

	/// Optional validation function
	pub validator: Option<SettingValidator>,
}

impl Clone for SettingDefinition {
	fn clone(&self) -> Self {
		SettingDefinition {
			key: self.key.clone(),
			description: self.description.clone(),
			default: self.default.clone(),
			requires: self.requires.clone(),
			conflicts: self.conflicts.clone(),
			restricted: self.restricted.clone(),
			validator: None, // Don't clone the validator function
		}
	}
}

impl Debug for SettingDefinition {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SettingDefinition")
			.field("key", &self.key)
			.field("description", &self.description)
			.field("default", &self.default)
			.field("requires", &self.requires)
			.field("conflicts", &self.conflicts)
			.field("restricted", &self.restricted)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl SettingDefinition {
	/// Create a builder for constructing a SettingDefinition
	pub fn builder(key: impl Into<Box<str>>) -> SettingDefinitionBuilder {
		SettingDefinitionBuilder::new(key)
	}

	/// Run the type check and the custom validator against a candidate value
	pub fn validate(&self, value: &SettingValue) -> ClResult<()> {
		if !value.matches_type(&self.default) {
			return Err(Error::ValidationError(format!(
				"Setting '{}' expects {}, got {}",
				self.key,
				self.default.type_name(),
				value.type_name()
			)));
		}
		if let Some(validator) = &self.validator {
			validator(value)?;
		}
		Ok(())
	}

	pub fn is_wildcard(&self) -> bool {
		self.key.ends_with(".*")
	}
}

/// Builder for SettingDefinition with fluent API
pub struct SettingDefinitionBuilder {
	key: Box<str>,
	description: Option<Box<str>>,
	default: Option<SettingValue>,
	requires: Option<Requirement>,
	conflicts: Vec<Predicate>,
	restricted: Option<Box<str>>,
	validator: Option<SettingValidator>,
}

impl SettingDefinitionBuilder {
	pub fn new(key: impl Into<Box<str>>) -> Self {
		Self {
			key: key.into(),
			description: None,
			default: None,
			requires: None,
			conflicts: Vec::new(),
			restricted: None,
			validator: None,
		}
	}

	/// Set the description (required)
	pub fn description(mut self, description: impl Into<Box<str>>) -> Self {
		self.description = Some(description.into());
		self
	}

	/// Set the default value (required)
	pub fn default(mut self, value: SettingValue) -> Self {
		self.default = Some(value);
		self
	}

	pub fn requires(mut self, requirement: Requirement) -> Self {
		self.requires = Some(requirement);
		self
	}

	pub fn conflicts_with(mut self, predicate: Predicate) -> Self {
		self.conflicts.push(predicate);
		self
	}

	/// Hide the setting from callers without `right`
	pub fn restricted(mut self, right: impl Into<Box<str>>) -> Self {
		self.restricted = Some(right.into());
		self
	}

	/// Set a validation function
	pub fn validator<F>(mut self, f: F) -> Self
	where
		F: Fn(&SettingValue) -> ClResult<()> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(f));
		self
	}

	/// Build the SettingDefinition
	pub fn build(self) -> ClResult<SettingDefinition> {
		let description = self
			.description
			.ok_or_else(|| Error::ConfigError(format!("Setting '{}' needs a description", self.key)))?;
		let default = self
			.default
			.ok_or_else(|| Error::ConfigError(format!("Setting '{}' needs a default", self.key)))?;
		if self.key.is_empty() || self.key.starts_with('.') {
			return Err(Error::ConfigError(format!("Invalid setting key: '{}'", self.key)));
		}

		Ok(SettingDefinition {
			key: self.key,
			description,
			default,
			requires: self.requires,
			conflicts: self.conflicts,
			restricted: self.restricted,
			validator: self.validator,
		})
	}
}

// YAML catalog files //
//********************//
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CatalogFile {
	content_models: Vec<Box<str>>,
	permanent_groups: Vec<Box<str>>,
	default_groups: BTreeMap<Box<str>, GroupPermissions>,
	extensions: Vec<ExtensionEntry>,
	settings: Vec<SettingEntry>,
}

#[derive(Debug, Deserialize)]
struct ExtensionEntry {
	id: Box<str>,
	description: Box<str>,
	#[serde(default)]
	requires: Option<Requirement>,
	#[serde(default)]
	conflicts: Vec<Predicate>,
	#[serde(default)]
	default_settings: BTreeMap<Box<str>, SettingValue>,
	#[serde(default)]
	install_scripts: Vec<ScriptAction>,
}

#[derive(Debug, Deserialize)]
struct SettingEntry {
	key: Box<str>,
	description: Box<str>,
	default: SettingValue,
	#[serde(default)]
	requires: Option<Requirement>,
	#[serde(default)]
	conflicts: Vec<Predicate>,
	#[serde(default)]
	restricted: Option<Box<str>>,
}

// CatalogBuilder //
//****************//
/// Mutable catalog used during app initialization
#[derive(Debug, Default)]
pub struct CatalogBuilder {
	extensions: HashMap<Box<str>, ExtensionDefinition>,
	settings: HashMap<Box<str>, SettingDefinition>,
	permanent_groups: BTreeSet<Box<str>>,
	default_groups: BTreeMap<Box<str>, GroupPermissions>,
	content_models: BTreeSet<Box<str>>,
}

impl CatalogBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_extension(&mut self, def: ExtensionDefinition) -> ClResult<()> {
		if self.extensions.contains_key(&def.id) {
			return Err(Error::ConfigError(format!("Extension '{}' is already registered", def.id)));
		}

		debug!("Registering extension: {}", def.id);
		self.extensions.insert(def.id.clone(), def);
		Ok(())
	}

	pub fn register_setting(&mut self, def: SettingDefinition) -> ClResult<()> {
		if self.settings.contains_key(&def.key) {
			return Err(Error::ConfigError(format!("Setting '{}' is already registered", def.key)));
		}

		debug!("Registering setting: {}", def.key);
		self.settings.insert(def.key.clone(), def);
		Ok(())
	}

	/// Groups that can never be deleted
	pub fn permanent_group(&mut self, group: impl Into<Box<str>>) -> &mut Self {
		self.permanent_groups.insert(group.into());
		self
	}

	/// Groups every new tenant starts with
	pub fn default_group(&mut self, group: impl Into<Box<str>>, perms: GroupPermissions) -> &mut Self {
		self.default_groups.insert(group.into(), perms);
		self
	}

	pub fn content_model(&mut self, model: impl Into<Box<str>>) -> &mut Self {
		self.content_models.insert(model.into());
		self
	}

	/// Merge a YAML catalog document
	pub fn load_yaml_str(&mut self, yaml: &str) -> ClResult<()> {
		let file: CatalogFile = serde_yaml::from_str(yaml)
			.map_err(|err| Error::ConfigError(format!("Invalid catalog file: {}", err)))?;

		for model in file.content_models {
			self.content_model(model);
		}
		for group in file.permanent_groups {
			self.permanent_group(group);
		}
		for (group, perms) in file.default_groups {
			self.default_group(group, perms);
		}
		for ext in file.extensions {
			self.register_extension(ExtensionDefinition {
				id: ext.id,
				description: ext.description,
				requires: ext.requires,
				conflicts: ext.conflicts,
				default_settings: ext.default_settings,
				install_scripts: ext.install_scripts,
			})?;
		}
		for setting in file.settings {
			let mut builder = SettingDefinition::builder(setting.key)
				.description(setting.description)
				.default(setting.default);
			if let Some(requires) = setting.requires {
				builder = builder.requires(requires);
			}
			for conflict in setting.conflicts {
				builder = builder.conflicts_with(conflict);
			}
			if let Some(right) = setting.restricted {
				builder = builder.restricted(right);
			}
			self.register_setting(builder.build()?)?;
		}
		Ok(())
	}

	pub async fn load_yaml_file(&mut self, path: &Path) -> ClResult<()> {
		info!("Loading catalog file {}", path.display());
		let yaml = tokio::fs::read_to_string(path).await.map_err(|err| {
			Error::ConfigError(format!("Cannot read catalog file {}: {}", path.display(), err))
		})?;
		self.load_yaml_str(&yaml)
	}

	/// Freeze the catalog (make it immutable)
	pub fn freeze(self) -> Catalog {
		// Seeded defaults must have a definition, otherwise the seed job would fail later
		for ext in self.extensions.values() {
			for key in ext.default_settings.keys() {
				if lookup(&self.settings, key).is_none() {
					warn!("Extension '{}' seeds unknown setting '{}'", ext.id, key);
				}
			}
		}
		info!(
			"Freezing catalog with {} extensions and {} settings",
			self.extensions.len(),
			self.settings.len()
		);
		Catalog {
			extensions: self.extensions,
			settings: self.settings,
			permanent_groups: self.permanent_groups,
			default_groups: self.default_groups,
			content_models: self.content_models,
		}
	}

	pub fn len(&self) -> usize {
		self.extensions.len() + self.settings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.extensions.is_empty() && self.settings.is_empty()
	}
}

/// Exact match first, then the `<first_element>.*` wildcard
fn lookup<'a>(
	settings: &'a HashMap<Box<str>, SettingDefinition>,
	key: &str,
) -> Option<&'a SettingDefinition> {
	if let Some(def) = settings.get(key) {
		return Some(def);
	}

	if let Some(dot_pos) = key.find('.') {
		let wildcard_key = format!("{}.*", &key[..dot_pos]);
		if let Some(def) = settings.get(wildcard_key.as_str()) {
			return Some(def);
		}
	}

	None
}

// Catalog //
//*********//
/// Immutable catalog stored in AppState
#[derive(Debug)]
pub struct Catalog {
	extensions: HashMap<Box<str>, ExtensionDefinition>,
	settings: HashMap<Box<str>, SettingDefinition>,
	permanent_groups: BTreeSet<Box<str>>,
	default_groups: BTreeMap<Box<str>, GroupPermissions>,
	content_models: BTreeSet<Box<str>>,
}

impl Catalog {
	pub fn extension(&self, id: &str) -> Option<&ExtensionDefinition> {
		self.extensions.get(id)
	}

	/// Get a setting definition by key, falling back to a wildcard definition
	pub fn setting(&self, key: &str) -> Option<&SettingDefinition> {
		lookup(&self.settings, key)
	}

	pub fn extensions(&self) -> impl Iterator<Item = &ExtensionDefinition> {
		self.extensions.values()
	}

	pub fn settings(&self) -> impl Iterator<Item = &SettingDefinition> {
		self.settings.values()
	}

	pub fn is_permanent_group(&self, group: &str) -> bool {
		self.permanent_groups.contains(group)
	}

	pub fn default_groups(&self) -> &BTreeMap<Box<str>, GroupPermissions> {
		&self.default_groups
	}

	pub fn has_content_model(&self, model: &str) -> bool {
		self.content_models.contains(model)
	}

	/// Effective value of a setting: tenant override, else catalog default
	pub fn effective<'a>(
		&'a self,
		overrides: &'a BTreeMap<Box<str>, SettingValue>,
		key: &str,
	) -> Option<&'a SettingValue> {
		let def = self.setting(key)?;
		Some(overrides.get(key).unwrap_or(&def.default))
	}

	pub fn len(&self) -> usize {
		self.extensions.len() + self.settings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.extensions.is_empty() && self.settings.is_empty()
	}
}

// Core registrations //
//********************//
pub const RIGHT_RESTRICTED_SETTINGS: &str = "managewiki-restricted";

/// Register the content models, groups and settings every farm has
pub fn register_core_catalog(catalog: &mut CatalogBuilder) -> ClResult<()> {
	for model in ["wikitext", "javascript", "css", "json", "text"] {
		catalog.content_model(model);
	}

	for group in ["*", "user", "sysop", "bureaucrat"] {
		catalog.permanent_group(group);
	}
	catalog
		.default_group("*", GroupPermissions::with_rights(["read", "createaccount"]))
		.default_group("user", GroupPermissions::with_rights(["read", "edit", "createpage"]))
		.default_group(
			"sysop",
			GroupPermissions::with_rights([
				"delete",
				"protect",
				"block",
				"manage-core",
				"manage-extensions",
				"manage-namespaces",
				"manage-settings",
			]),
		)
		.default_group("bureaucrat", {
			let mut perms = GroupPermissions::with_rights(["manage-permissions"]);
			perms.add_groups = ["sysop", "bureaucrat"].into_iter().map(Into::into).collect();
			perms.remove_groups = ["sysop"].into_iter().map(Into::into).collect();
			perms
		});

	catalog.register_setting(
		SettingDefinition::builder("wgLogo")
			.description("URL of the wiki logo")
			.default(SettingValue::String(String::new()))
			.build()?,
	)?;

	catalog.register_setting(
		SettingDefinition::builder("wgDefaultSkin")
			.description("Skin used for anonymous visitors and new accounts")
			.default(SettingValue::String("vector".into()))
			.validator(|value| match value {
				SettingValue::String(s) if !s.is_empty() => Ok(()),
				_ => Err(Error::ValidationError("default skin cannot be empty".into())),
			})
			.build()?,
	)?;

	catalog.register_setting(
		SettingDefinition::builder("wgEnableUploads")
			.description("Allow file uploads")
			.default(SettingValue::Bool(false))
			.build()?,
	)?;

	catalog.register_setting(
		SettingDefinition::builder("wgMaxArticleSize")
			.description("Maximum page size in kibibytes")
			.default(SettingValue::Int(2048))
			.validator(|value| match value {
				SettingValue::Int(size) if (1..=12288).contains(size) => Ok(()),
				_ => Err(Error::ValidationError("article size must be 1..=12288 KiB".into())),
			})
			.build()?,
	)?;

	catalog.register_setting(
		SettingDefinition::builder("wgServerAliases")
			.description("Additional host names served by the wiki")
			.default(SettingValue::List(Vec::new()))
			.build()?,
	)?;

	catalog.register_setting(
		SettingDefinition::builder("wgDebugLogFile")
			.description("Path of the debug log file")
			.default(SettingValue::String(String::new()))
			.restricted(RIGHT_RESTRICTED_SETTINGS)
			.build()?,
	)?;

	Ok(())
}


// vim: ts=4
