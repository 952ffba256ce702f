//! Pages and recent changes used by namespace migrations

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use farmconf_types::config_adapter::{OriginUpdate, Page, PageMove, PageSelector, RecentChange};
use farmconf_types::prelude::*;
use farmconf_types::types::PageId;

use crate::utils::*;

fn page_from_row(row: &SqliteRow) -> Result<Page, sqlx::Error> {
	Ok(Page {
		page_id: row.try_get::<i64, _>("page_id")?.cast_unsigned(),
		namespace: row.try_get("namespace")?,
		title: row.try_get("title")?,
		origin_namespace: row.try_get("origin_namespace")?,
		origin_title: row.try_get("origin_title")?,
	})
}

/// Create a page and its first recent-changes row
pub(crate) async fn create(
	db: &SqlitePool,
	tenant: &TenantKey,
	namespace: i32,
	title: &str,
) -> ClResult<PageId> {
	let mut tx = db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	let res = sqlx::query(
		"INSERT INTO pages (tenant, namespace, title) VALUES (?, ?, ?) RETURNING page_id",
	)
	.bind(tenant.as_str())
	.bind(namespace)
	.bind(title)
	.fetch_one(&mut *tx)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;
	let page_id: i64 = res.try_get(0).inspect_err(inspect).map_err(|_| Error::DbError)?;

	sqlx::query("INSERT INTO recent_changes (tenant, page_id, namespace, title) VALUES (?, ?, ?, ?)")
		.bind(tenant.as_str())
		.bind(page_id)
		.bind(namespace)
		.bind(title)
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	tx.commit().await.inspect_err(inspect).map_err(|_| Error::DbError)?;
	Ok(page_id.cast_unsigned())
}

pub(crate) async fn read(db: &SqlitePool, tenant: &TenantKey, page_id: PageId) -> ClResult<Page> {
	let res = sqlx::query(
		"SELECT page_id, namespace, title, origin_namespace, origin_title
		FROM pages WHERE tenant=? AND page_id=?",
	)
	.bind(tenant.as_str())
	.bind(page_id.cast_signed())
	.fetch_one(db)
	.await;

	map_res(res, |row| page_from_row(&row))
}

pub(crate) async fn exists(
	db: &SqlitePool,
	tenant: &TenantKey,
	namespace: i32,
	title: &str,
) -> ClResult<bool> {
	let res = sqlx::query("SELECT 1 FROM pages WHERE tenant=? AND namespace=? AND title=?")
		.bind(tenant.as_str())
		.bind(namespace)
		.bind(title)
		.fetch_optional(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	Ok(res.is_some())
}

/// One keyset-paginated batch of pages, ordered by page id
pub(crate) async fn list_for_migration(
	db: &SqlitePool,
	tenant: &TenantKey,
	selector: PageSelector,
	after: Option<PageId>,
	limit: u32,
) -> ClResult<Vec<Page>> {
	let mut query = sqlx::QueryBuilder::new(
		"SELECT page_id, namespace, title, origin_namespace, origin_title FROM pages WHERE tenant=",
	);
	query.push_bind(tenant.as_str());
	match selector {
		PageSelector::Namespace(ns) => query.push(" AND namespace=").push_bind(ns),
		PageSelector::Origin(ns) => query.push(" AND origin_namespace=").push_bind(ns),
	};
	if let Some(after) = after {
		query.push(" AND page_id>").push_bind(after.cast_signed());
	}
	query.push(" ORDER BY page_id LIMIT ").push_bind(i64::from(limit));

	let res = query
		.build()
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(page_from_row))
}

/// Move a page and mirror the move into its recent changes, in one transaction
pub(crate) async fn move_page(
	db: &SqlitePool,
	tenant: &TenantKey,
	page_id: PageId,
	mv: &PageMove,
) -> ClResult<()> {
	let mut tx = db.begin().await.inspect_err(inspect).map_err(|_| Error::DbError)?;

	let mut query = sqlx::QueryBuilder::new("UPDATE pages SET namespace=");
	query.push_bind(mv.namespace).push(", title=").push_bind(&*mv.title);
	match &mv.origin {
		OriginUpdate::Keep => {}
		OriginUpdate::Set { namespace, title } => {
			query
				.push(", origin_namespace=")
				.push_bind(*namespace)
				.push(", origin_title=")
				.push_bind(&**title);
		}
		OriginUpdate::Clear => {
			query.push(", origin_namespace=NULL, origin_title=NULL");
		}
	}
	query
		.push(" WHERE tenant=")
		.push_bind(tenant.as_str())
		.push(" AND page_id=")
		.push_bind(page_id.cast_signed());

	let res = query
		.build()
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;
	if res.rows_affected() == 0 {
		return Err(Error::NotFound);
	}

	sqlx::query("UPDATE recent_changes SET namespace=?, title=? WHERE tenant=? AND page_id=?")
		.bind(mv.namespace)
		.bind(&*mv.title)
		.bind(tenant.as_str())
		.bind(page_id.cast_signed())
		.execute(&mut *tx)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	tx.commit().await.inspect_err(inspect).map_err(|_| Error::DbError)?;
	Ok(())
}

pub(crate) async fn list_recent_changes(
	db: &SqlitePool,
	tenant: &TenantKey,
	page_id: PageId,
) -> ClResult<Vec<RecentChange>> {
	let res = sqlx::query(
		"SELECT rc_id, page_id, namespace, title, created_at FROM recent_changes
		WHERE tenant=? AND page_id=? ORDER BY rc_id",
	)
	.bind(tenant.as_str())
	.bind(page_id.cast_signed())
	.fetch_all(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(|row| {
		Ok(RecentChange {
			rc_id: row.try_get::<i64, _>("rc_id")?.cast_unsigned(),
			page_id: row.try_get::<i64, _>("page_id")?.cast_unsigned(),
			namespace: row.try_get("namespace")?,
			title: row.try_get("title")?,
			created_at: row.try_get("created_at").map(Timestamp)?,
		})
	}))
}

// vim: ts=4
