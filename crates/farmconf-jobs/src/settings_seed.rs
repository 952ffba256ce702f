//! Settings seed job
//!
//! Writes the catalog's default settings of a newly enabled extension as
//! tenant overrides. Keys the tenant already overrides are left alone.

use async_trait::async_trait;
use std::sync::Arc;

use crate::prelude::*;
use farmconf_core::migration::{KIND_SETTINGS_SEED, SettingsSeedParams};
use farmconf_core::modules::{Caller, DomainModule, SettingChange};
use farmconf_core::registry::ModuleRegistry;
use farmconf_core::scheduler::Task;
use farmconf_types::types::TaskId;

#[derive(Debug)]
pub struct SettingsSeedTask {
	params: SettingsSeedParams,
}

impl SettingsSeedTask {
	pub fn new(params: SettingsSeedParams) -> Arc<Self> {
		Arc::new(Self { params })
	}
}

#[async_trait]
impl Task<App> for SettingsSeedTask {
	fn kind() -> &'static str {
		KIND_SETTINGS_SEED
	}

	fn kind_of(&self) -> &'static str {
		Self::kind()
	}

	fn build(_id: TaskId, context: &str) -> ClResult<Arc<dyn Task<App>>> {
		let params: SettingsSeedParams = serde_json::from_str(context)
			.map_err(|e| Error::ValidationError(format!("Invalid settings seed parameters: {}", e)))?;
		Ok(Self::new(params))
	}

	fn serialize(&self) -> String {
		serde_json::to_string(&self.params).unwrap_or_default()
	}

	async fn run(&self, app: &App) -> ClResult<()> {
		let SettingsSeedParams { tenant, extension } = &self.params;
		let Some(def) = app.catalog.extension(extension) else {
			warn!(tenant = %tenant, "Extension {} is no longer in the catalog", extension);
			return Ok(());
		};

		let registry = ModuleRegistry::new(app);
		let mut settings = registry.settings(tenant, Caller::system()).await?;
		if !settings.record().has_extension(extension) {
			info!(tenant = %tenant, "Extension {} was disabled, nothing to seed", extension);
			return Ok(());
		}

		for (key, value) in &def.default_settings {
			if settings.record().settings.contains_key(key) {
				debug!(tenant = %tenant, "Setting {} already overridden", key);
				continue;
			}
			let change = SettingChange::Set { key: key.clone(), value: value.clone() };
			if let Err(e) = settings.stage(change) {
				warn!(tenant = %tenant, "Skipping default {} of {}: {}", key, extension, e);
			}
		}

		let outcome = settings.commit().await?;
		info!(
			tenant = %tenant,
			source_version = outcome.source_version,
			"Seeded {} setting(s) of {}",
			outcome.diff.settings.changed.len(),
			extension
		);
		Ok(())
	}
}

// vim: ts=4
