//! Startup provisioning

use crate::prelude::*;
use farmconf_core::registry::ModuleRegistry;

/// Language of tenants provisioned at startup
const DEFAULT_LANGUAGE: &str = "en";

/// Create the system tenant if it is configured and missing
pub async fn bootstrap(app: &App) -> ClResult<()> {
	let Some(tenant) = &app.opts.system_tenant else {
		return Ok(());
	};

	match app.adapter.read_tenant(tenant).await {
		Ok(_) => {
			debug!(tenant = %tenant, "System tenant exists");
			Ok(())
		}
		Err(Error::NotFound) => {
			info!(tenant = %tenant, "Provisioning system tenant");
			ModuleRegistry::new(app).create_tenant(tenant, tenant.as_str(), DEFAULT_LANGUAGE).await?;
			Ok(())
		}
		Err(e) => {
			error!(tenant = %tenant, "Cannot read system tenant: {}", e);
			Err(e)
		}
	}
}

// vim: ts=4
