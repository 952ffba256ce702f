//! Shared utilities for SQLite adapter
//!
//! Helper functions, macros and error mapping used across the domain modules.

use serde::{Serialize, de::DeserializeOwned};
use sqlx::sqlite::SqliteRow;

use farmconf_types::prelude::*;

/// Applies a Patch field to an UPDATE query with proper binding
/// Returns true if the field was added (for tracking has_updates)
macro_rules! push_patch {
	($query:expr, $has_updates:expr, $field:literal, $patch:expr) => {{
		match $patch {
			Patch::Undefined => $has_updates,
			Patch::Null => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=NULL"));
				true
			}
			Patch::Value(v) => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=")).push_bind(v);
				true
			}
		}
	}};
	// For values that need conversion before binding
	($query:expr, $has_updates:expr, $field:literal, $patch:expr, |$v:ident| $convert:expr) => {{
		match $patch {
			Patch::Undefined => $has_updates,
			Patch::Null => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=NULL"));
				true
			}
			Patch::Value($v) => {
				if $has_updates {
					$query.push(", ");
				}
				$query.push(concat!($field, "=")).push_bind($convert);
				true
			}
		}
	}};
}

pub(crate) use push_patch;

/// Build an IN clause with parameterized values
pub(crate) fn push_in<'a>(
	mut query: sqlx::QueryBuilder<'a, sqlx::Sqlite>,
	values: &'a [impl AsRef<str>],
) -> sqlx::QueryBuilder<'a, sqlx::Sqlite> {
	query.push("(");
	for (i, value) in values.iter().enumerate() {
		if i > 0 {
			query.push(", ");
		}
		query.push_bind(value.as_ref());
	}
	query.push(")");
	query
}

/// Log database error for debugging
pub(crate) fn inspect(err: &sqlx::Error) {
	warn!("DB: {:#?}", err);
}

/// Map an error inside a commit transaction
pub(crate) fn tx_err(err: sqlx::Error) -> Error {
	inspect(&err);
	Error::TransactionFailure(err.to_string())
}

/// Map a single-row query result, translating SQL errors to ClResult
pub(crate) fn map_res<T, F>(row: Result<SqliteRow, sqlx::Error>, f: F) -> ClResult<T>
where
	F: FnOnce(SqliteRow) -> Result<T, sqlx::Error>,
{
	match row {
		Ok(row) => f(row).inspect_err(inspect).map_err(|_| Error::DbError),
		Err(sqlx::Error::RowNotFound) => Err(Error::NotFound),
		Err(err) => {
			inspect(&err);
			Err(Error::DbError)
		}
	}
}

/// Collect an iterator of query results, translating errors
pub(crate) fn collect_res<T>(
	iter: impl Iterator<Item = Result<T, sqlx::Error>> + Unpin,
) -> ClResult<Vec<T>> {
	let mut items = Vec::new();
	for item in iter {
		items.push(item.inspect_err(inspect).map_err(|_| Error::DbError)?);
	}
	Ok(items)
}

/// Decode a JSON column, reporting failures as a column decode error
pub(crate) fn from_json<T: DeserializeOwned>(column: &str, value: &str) -> Result<T, sqlx::Error> {
	serde_json::from_str(value).map_err(|err| sqlx::Error::ColumnDecode {
		index: column.to_string(),
		source: Box::new(err),
	})
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> ClResult<String> {
	serde_json::to_string(value).map_err(|e| Error::Internal(format!("JSON encode: {}", e)))
}

// vim: ts=4
