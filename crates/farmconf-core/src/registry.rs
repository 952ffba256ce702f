//! Entry point for binding domain modules to a tenant

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::modules::site::{validate_language, validate_sitename};
use crate::modules::{
	Caller, CoreModule, ExtensionsModule, NamespacesModule, PermissionsModule, SettingsModule,
};
use crate::prelude::*;
use farmconf_types::config_adapter::CreateTenantData;
use farmconf_types::record::{ConfigRecord, CoreAttributes, NS_MAIN, NamespaceDef};

pub const NS_TALK: i32 = 1;

/// Hands out domain modules hydrated from the snapshot cache
#[derive(Clone, Debug)]
pub struct ModuleRegistry {
	app: App,
}

impl ModuleRegistry {
	pub fn new(app: &App) -> Self {
		Self { app: app.clone() }
	}

	pub async fn snapshot(&self, tenant: &TenantKey) -> ClResult<Arc<ConfigRecord>> {
		self.app.cache.get(tenant).await
	}

	pub async fn core(&self, tenant: &TenantKey, caller: Caller) -> ClResult<CoreModule> {
		Ok(CoreModule::new(self.app.clone(), caller, self.snapshot(tenant).await?))
	}

	pub async fn extensions(&self, tenant: &TenantKey, caller: Caller) -> ClResult<ExtensionsModule> {
		Ok(ExtensionsModule::new(self.app.clone(), caller, self.snapshot(tenant).await?))
	}

	pub async fn namespaces(&self, tenant: &TenantKey, caller: Caller) -> ClResult<NamespacesModule> {
		Ok(NamespacesModule::new(self.app.clone(), caller, self.snapshot(tenant).await?))
	}

	pub async fn permissions(
		&self,
		tenant: &TenantKey,
		caller: Caller,
	) -> ClResult<PermissionsModule> {
		Ok(PermissionsModule::new(self.app.clone(), caller, self.snapshot(tenant).await?))
	}

	pub async fn settings(&self, tenant: &TenantKey, caller: Caller) -> ClResult<SettingsModule> {
		Ok(SettingsModule::new(self.app.clone(), caller, self.snapshot(tenant).await?))
	}

	/// Provision a tenant with the main and talk namespaces and the default groups
	pub async fn create_tenant(
		&self,
		tenant: &TenantKey,
		sitename: &str,
		language: &str,
	) -> ClResult<Arc<ConfigRecord>> {
		validate_sitename(sitename)?;
		validate_language(language)?;

		let core = CoreAttributes::new(sitename.trim(), language);
		let namespaces = BTreeMap::from([
			(NS_MAIN, NamespaceDef::new("Main")),
			(NS_TALK, NamespaceDef::new("Talk")),
		]);
		let data = CreateTenantData {
			core: &core,
			namespaces: &namespaces,
			permissions: self.app.catalog.default_groups(),
		};
		self.app.adapter.create_tenant(tenant, data).await?;
		info!(tenant = %tenant, "Created tenant {}", sitename);

		// Drop a cached negative lookup
		self.app.cache.invalidate(tenant).await?;
		self.snapshot(tenant).await
	}
}

// vim: ts=4
