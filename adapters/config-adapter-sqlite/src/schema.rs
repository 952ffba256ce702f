//! Database schema initialization
//!
//! Creates tables and indexes. Every statement is idempotent, so `init_db`
//! runs on each start.

use sqlx::SqlitePool;

/// Initialize the database schema with all required tables and indexes
pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	// Tenants
	//*********
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS tenants (
		tenant text NOT NULL,
		sitename text NOT NULL,
		language text NOT NULL,
		states json NOT NULL DEFAULT '[]',
		config_version integer NOT NULL DEFAULT 0,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(tenant)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Configuration domains
	//***********************
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS extensions (
		tenant text NOT NULL,
		extensions json NOT NULL DEFAULT '[]',
		PRIMARY KEY(tenant)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS settings (
		tenant text NOT NULL,
		name text NOT NULL,
		value json NOT NULL,
		PRIMARY KEY(tenant, name)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS namespaces (
		tenant text NOT NULL,
		ns_id integer NOT NULL,
		name text NOT NULL,
		content_model text NOT NULL,
		searchable boolean NOT NULL DEFAULT 1,
		subpages boolean NOT NULL DEFAULT 0,
		protection text,
		PRIMARY KEY(tenant, ns_id)
	)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS permissions (
		tenant text NOT NULL,
		grp text NOT NULL,
		rights json NOT NULL DEFAULT '[]',
		add_groups json NOT NULL DEFAULT '[]',
		remove_groups json NOT NULL DEFAULT '[]',
		PRIMARY KEY(tenant, grp)
	)",
	)
	.execute(&mut *tx)
	.await?;

	// Pages
	//*******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS pages (
		page_id integer NOT NULL,
		tenant text NOT NULL,
		namespace integer NOT NULL,
		title text NOT NULL,
		origin_namespace integer,
		origin_title text,
		PRIMARY KEY(page_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_tenant_ns_title ON pages(tenant, namespace, title)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_pages_tenant_origin ON pages(tenant, origin_namespace, page_id)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS recent_changes (
		rc_id integer NOT NULL,
		tenant text NOT NULL,
		page_id integer NOT NULL,
		namespace integer NOT NULL,
		title text NOT NULL,
		created_at datetime DEFAULT (unixepoch()),
		PRIMARY KEY(rc_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE INDEX IF NOT EXISTS idx_recent_changes_page ON recent_changes(tenant, page_id)",
	)
	.execute(&mut *tx)
	.await?;

	// Tasks
	//*******
	sqlx::query(
		"CREATE TABLE IF NOT EXISTS tasks (
		task_id integer NOT NULL,
		kind text NOT NULL,
		key text,
		status char(1),			-- 'P': pending, 'F': finished, 'E': error
		created_at datetime DEFAULT (unixepoch()),
		next_at datetime,
		retry text,
		input text,
		output text,
		error text,
		PRIMARY KEY(task_id)
	)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query(
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_task_kind_key ON tasks(kind, key) WHERE status='P'",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

// vim: ts=4
