//! Configuration domain rows and the transactional changeset commit
//!
//! Layout: extensions as one set-valued row per tenant, settings as
//! name -> JSON value rows, namespaces as id -> definition rows and
//! permissions as group -> (rights, add_groups, remove_groups) rows.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use farmconf_types::diff::ConfigDiff;
use farmconf_types::prelude::*;
use farmconf_types::record::{GroupPermissions, NamespaceDef, SettingValue};

use crate::utils::*;

// Reads
//*******
pub(crate) async fn read_extensions(db: &SqlitePool, tenant: &TenantKey) -> ClResult<Vec<Box<str>>> {
	let res = sqlx::query("SELECT extensions FROM extensions WHERE tenant=?")
		.bind(tenant.as_str())
		.fetch_optional(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	let Some(row) = res else {
		return Ok(Vec::new());
	};
	let set: BTreeSet<Box<str>> = row
		.try_get::<&str, _>("extensions")
		.and_then(|value| from_json("extensions", value))
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(set.into_iter().collect())
}

pub(crate) async fn list_settings(
	db: &SqlitePool,
	tenant: &TenantKey,
) -> ClResult<BTreeMap<Box<str>, SettingValue>> {
	let res = sqlx::query("SELECT name, value FROM settings WHERE tenant=?")
		.bind(tenant.as_str())
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	let items = collect_res(res.iter().map(|row| {
		let name: Box<str> = row.try_get("name")?;
		let value: SettingValue = from_json("value", row.try_get::<&str, _>("value")?)?;
		Ok((name, value))
	}))?;
	Ok(items.into_iter().collect())
}

pub(crate) async fn list_namespaces(
	db: &SqlitePool,
	tenant: &TenantKey,
) -> ClResult<BTreeMap<i32, NamespaceDef>> {
	let res = sqlx::query(
		"SELECT ns_id, name, content_model, searchable, subpages, protection
		FROM namespaces WHERE tenant=?",
	)
	.bind(tenant.as_str())
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	let items = collect_res(res.iter().map(|row| {
		Ok((
			row.try_get::<i32, _>("ns_id")?,
			NamespaceDef {
				name: row.try_get("name")?,
				content_model: row.try_get("content_model")?,
				searchable: row.try_get("searchable")?,
				subpages: row.try_get("subpages")?,
				protection: row.try_get("protection")?,
			},
		))
	}))?;
	Ok(items.into_iter().collect())
}

pub(crate) async fn list_permissions(
	db: &SqlitePool,
	tenant: &TenantKey,
) -> ClResult<BTreeMap<Box<str>, GroupPermissions>> {
	let res = sqlx::query(
		"SELECT grp, rights, add_groups, remove_groups FROM permissions WHERE tenant=?",
	)
	.bind(tenant.as_str())
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	let items = collect_res(res.iter().map(|row| {
		Ok((
			row.try_get::<Box<str>, _>("grp")?,
			GroupPermissions {
				rights: from_json("rights", row.try_get("rights")?)?,
				add_groups: from_json("add_groups", row.try_get("add_groups")?)?,
				remove_groups: from_json("remove_groups", row.try_get("remove_groups")?)?,
			},
		))
	}))?;
	Ok(items.into_iter().collect())
}

// Row writers shared by tenant creation and commit
//**************************************************
pub(crate) async fn upsert_namespace(
	tx: &mut Transaction<'_, Sqlite>,
	tenant: &TenantKey,
	id: i32,
	def: &NamespaceDef,
) -> Result<(), sqlx::Error> {
	sqlx::query(
		"INSERT OR REPLACE INTO namespaces
		(tenant, ns_id, name, content_model, searchable, subpages, protection)
		VALUES (?, ?, ?, ?, ?, ?, ?)",
	)
	.bind(tenant.as_str())
	.bind(id)
	.bind(&*def.name)
	.bind(&*def.content_model)
	.bind(def.searchable)
	.bind(def.subpages)
	.bind(def.protection.as_deref())
	.execute(&mut **tx)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

pub(crate) async fn upsert_group(
	tx: &mut Transaction<'_, Sqlite>,
	tenant: &TenantKey,
	group: &str,
	perms: &GroupPermissions,
) -> Result<(), sqlx::Error> {
	let encode = |set: &BTreeSet<Box<str>>| {
		serde_json::to_string(set).map_err(|err| sqlx::Error::Encode(Box::new(err)))
	};
	sqlx::query(
		"INSERT OR REPLACE INTO permissions (tenant, grp, rights, add_groups, remove_groups)
		VALUES (?, ?, ?, ?, ?)",
	)
	.bind(tenant.as_str())
	.bind(group)
	.bind(encode(&perms.rights)?)
	.bind(encode(&perms.add_groups)?)
	.bind(encode(&perms.remove_groups)?)
	.execute(&mut **tx)
	.await
	.inspect_err(inspect)?;
	Ok(())
}

async fn delete_namespace(
	tx: &mut Transaction<'_, Sqlite>,
	tenant: &TenantKey,
	id: i32,
) -> Result<(), sqlx::Error> {
	sqlx::query("DELETE FROM namespaces WHERE tenant=? AND ns_id=?")
		.bind(tenant.as_str())
		.bind(id)
		.execute(&mut **tx)
		.await?;
	Ok(())
}

// Commit
//********
/// Apply a diff and bump `config_version`, all in one transaction
pub(crate) async fn commit(db: &SqlitePool, tenant: &TenantKey, diff: &ConfigDiff) -> ClResult<u64> {
	let mut tx = db.begin().await.map_err(tx_err)?;

	let version = sqlx::query(
		"UPDATE tenants SET config_version=config_version+1 WHERE tenant=? RETURNING config_version",
	)
	.bind(tenant.as_str())
	.fetch_optional(&mut *tx)
	.await
	.map_err(tx_err)?;
	let Some(version) = version else {
		return Err(Error::TransactionFailure(format!("Unknown tenant {}", tenant)));
	};
	let version = version.try_get::<i64, _>(0).map_err(tx_err)?.cast_unsigned();

	// Core
	if let Some(core) = &diff.core {
		sqlx::query("UPDATE tenants SET sitename=?, language=?, states=? WHERE tenant=?")
			.bind(&*core.after.sitename)
			.bind(&*core.after.language)
			.bind(to_json(&core.after.states)?)
			.bind(tenant.as_str())
			.execute(&mut *tx)
			.await
			.map_err(tx_err)?;
	}

	// Extensions
	if !diff.extensions.added.is_empty() || !diff.extensions.removed.is_empty() {
		let current = sqlx::query("SELECT extensions FROM extensions WHERE tenant=?")
			.bind(tenant.as_str())
			.fetch_optional(&mut *tx)
			.await
			.map_err(tx_err)?;
		let mut set: BTreeSet<Box<str>> = match current {
			Some(row) => row
				.try_get::<&str, _>("extensions")
				.and_then(|value| from_json("extensions", value))
				.map_err(tx_err)?,
			None => BTreeSet::new(),
		};
		set.retain(|ext| !diff.extensions.removed.contains(ext));
		set.extend(diff.extensions.added.iter().cloned());

		sqlx::query("INSERT OR REPLACE INTO extensions (tenant, extensions) VALUES (?, ?)")
			.bind(tenant.as_str())
			.bind(to_json(&set)?)
			.execute(&mut *tx)
			.await
			.map_err(tx_err)?;
	}

	// Settings
	for (name, value) in &diff.settings.changed {
		sqlx::query("INSERT OR REPLACE INTO settings (tenant, name, value) VALUES (?, ?, ?)")
			.bind(tenant.as_str())
			.bind(&**name)
			.bind(to_json(value)?)
			.execute(&mut *tx)
			.await
			.map_err(tx_err)?;
	}
	for name in &diff.settings.reset {
		sqlx::query("DELETE FROM settings WHERE tenant=? AND name=?")
			.bind(tenant.as_str())
			.bind(&**name)
			.execute(&mut *tx)
			.await
			.map_err(tx_err)?;
	}

	// Namespaces: deletions first so moved and restored ids can be reinserted
	let ns = &diff.namespaces;
	for id in ns.removed.keys().chain(ns.moved.iter().map(|mv| &mv.from)) {
		delete_namespace(&mut tx, tenant, *id).await.map_err(tx_err)?;
	}
	for (id, def) in ns
		.upserted
		.iter()
		.chain(ns.moved.iter().map(|mv| (&mv.to, &mv.def)))
		.chain(ns.restored.iter().map(|(id, restore)| (id, &restore.def)))
	{
		upsert_namespace(&mut tx, tenant, *id, def).await.map_err(tx_err)?;
	}

	// Permissions
	for (group, perms) in &diff.permissions.upserted {
		upsert_group(&mut tx, tenant, group, perms).await.map_err(tx_err)?;
	}
	for group in &diff.permissions.removed {
		sqlx::query("DELETE FROM permissions WHERE tenant=? AND grp=?")
			.bind(tenant.as_str())
			.bind(&**group)
			.execute(&mut *tx)
			.await
			.map_err(tx_err)?;
	}

	tx.commit().await.map_err(tx_err)?;
	debug!(tenant = %tenant, version, "Changeset committed");
	Ok(version)
}

// vim: ts=4
