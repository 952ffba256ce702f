//! Tenant rows

use std::collections::BTreeSet;

use sqlx::{Row, SqlitePool};

use farmconf_types::config_adapter::{CreateTenantData, TenantRow};
use farmconf_types::prelude::*;
use farmconf_types::record::{CoreAttributes, WikiState};

use crate::config;
use crate::utils::*;

/// Create a tenant with its initial namespaces and permission groups
pub(crate) async fn create(
	db: &SqlitePool,
	tenant: &TenantKey,
	data: &CreateTenantData<'_>,
) -> ClResult<()> {
	let mut tx = db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	let res = sqlx::query(
		"INSERT OR IGNORE INTO tenants (tenant, sitename, language, states) VALUES (?, ?, ?, ?)",
	)
	.bind(tenant.as_str())
	.bind(&*data.core.sitename)
	.bind(&*data.core.language)
	.bind(to_json(&data.core.states)?)
	.execute(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::ValidationError(format!("Tenant {} already exists", tenant)));
	}

	sqlx::query("INSERT INTO extensions (tenant, extensions) VALUES (?, '[]')")
		.bind(tenant.as_str())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	for (id, def) in data.namespaces {
		config::upsert_namespace(&mut tx, tenant, *id, def).await.map_err(|_| Error::DbError)?;
	}
	for (group, perms) in data.permissions {
		config::upsert_group(&mut tx, tenant, group, perms).await.map_err(|_| Error::DbError)?;
	}

	tx.commit().await.inspect_err(inspect).map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn read(db: &SqlitePool, tenant: &TenantKey) -> ClResult<TenantRow> {
	let res = sqlx::query(
		"SELECT sitename, language, states, config_version, created_at FROM tenants WHERE tenant=?",
	)
	.bind(tenant.as_str())
	.fetch_one(db)
	.await;

	map_res(res, |row| {
		let states: &str = row.try_get("states")?;
		let states: BTreeSet<WikiState> = from_json("states", states)?;
		Ok(TenantRow {
			tenant: tenant.clone(),
			core: CoreAttributes {
				sitename: row.try_get("sitename")?,
				language: row.try_get("language")?,
				states,
			},
			config_version: row.try_get::<i64, _>("config_version")?.cast_unsigned(),
			created_at: row.try_get("created_at").map(Timestamp)?,
		})
	})
}

pub(crate) async fn list(db: &SqlitePool) -> ClResult<Vec<TenantKey>> {
	let res = sqlx::query("SELECT tenant FROM tenants ORDER BY tenant")
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	let names = collect_res(res.iter().map(|row| row.try_get::<String, _>("tenant")))?;
	names.iter().map(|name| TenantKey::new(name)).collect()
}

// vim: ts=4
