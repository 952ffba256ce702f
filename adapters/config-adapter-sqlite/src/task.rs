//! Task persistence and scheduling

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use farmconf_types::config_adapter::{ListTaskOptions, Task, TaskPatch};
use farmconf_types::prelude::*;
use farmconf_types::types::TaskId;

use crate::utils::*;

const TASK_COLUMNS: &str = "task_id, kind, key, status, created_at, next_at, retry, input, output, error";

fn task_from_row(row: &SqliteRow) -> Result<Task, sqlx::Error> {
	let status: &str = row.try_get("status")?;
	Ok(Task {
		task_id: row.try_get::<i64, _>("task_id")?.cast_unsigned(),
		kind: row.try_get("kind")?,
		key: row.try_get("key")?,
		status: status.chars().next().unwrap_or('E'),
		created_at: row.try_get("created_at").map(Timestamp)?,
		next_at: row.try_get::<Option<i64>, _>("next_at")?.map(Timestamp),
		retry: row.try_get("retry")?,
		input: row.try_get("input")?,
		output: row.try_get("output")?,
		error: row.try_get("error")?,
	})
}

/// List tasks, pending ones unless a status filter is given
pub(crate) async fn list(db: &SqlitePool, opts: &ListTaskOptions) -> ClResult<Vec<Task>> {
	let statuses: Vec<String> = match &opts.status {
		Some(status) => status.iter().map(char::to_string).collect(),
		None => vec!["P".to_string()],
	};

	let mut query = sqlx::QueryBuilder::new(format!("SELECT {} FROM tasks WHERE status IN ", TASK_COLUMNS));
	query = push_in(query, &statuses);
	if let Some(kind) = &opts.kind {
		query.push(" AND kind=").push_bind(&**kind);
	}
	query.push(" ORDER BY task_id");

	let res = query
		.build()
		.fetch_all(db)
		.await
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)?;

	collect_res(res.iter().map(task_from_row))
}

pub(crate) async fn create(
	db: &SqlitePool,
	kind: &'static str,
	key: Option<&str>,
	input: &str,
) -> ClResult<TaskId> {
	let res = sqlx::query(
		"INSERT INTO tasks (kind, key, status, input) VALUES (?, ?, 'P', ?) RETURNING task_id",
	)
	.bind(kind)
	.bind(key)
	.bind(input)
	.fetch_one(db)
	.await;

	map_res(res, |row| row.try_get::<i64, _>(0).map(i64::cast_unsigned))
}

/// Mark a task as finished
pub(crate) async fn mark_finished(db: &SqlitePool, task_id: TaskId, output: &str) -> ClResult<()> {
	sqlx::query(
		"UPDATE tasks SET status='F', output=?, next_at=NULL WHERE task_id=? AND status='P'",
	)
	.bind(output)
	.bind(task_id.cast_signed())
	.execute(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	Ok(())
}

/// Record a task error; with `next_at` the task stays pending for a retry
pub(crate) async fn mark_error(
	db: &SqlitePool,
	task_id: TaskId,
	output: &str,
	next_at: Option<Timestamp>,
) -> ClResult<()> {
	match next_at {
		Some(next_at) => {
			sqlx::query("UPDATE tasks SET error=?, next_at=? WHERE task_id=? AND status='P'")
				.bind(output)
				.bind(next_at.0)
				.bind(task_id.cast_signed())
				.execute(db)
				.await
				.inspect_err(inspect)
				.map_err(|_| Error::DbError)?;
		}
		None => {
			sqlx::query(
				"UPDATE tasks SET error=?, status='E', next_at=NULL WHERE task_id=? AND status='P'",
			)
			.bind(output)
			.bind(task_id.cast_signed())
			.execute(db)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
		}
	}

	Ok(())
}

/// Find a pending task by its key
pub(crate) async fn find_by_key(db: &SqlitePool, key: &str) -> ClResult<Option<Task>> {
	let res = sqlx::query(&format!(
		"SELECT {} FROM tasks WHERE status='P' AND key=? ORDER BY task_id DESC LIMIT 1",
		TASK_COLUMNS
	))
	.bind(key)
	.fetch_optional(db)
	.await
	.inspect_err(inspect)
	.map_err(|_| Error::DbError)?;

	res.as_ref()
		.map(task_from_row)
		.transpose()
		.inspect_err(inspect)
		.map_err(|_| Error::DbError)
}

/// Update task fields with partial updates using a single query
pub(crate) async fn update(db: &SqlitePool, task_id: TaskId, patch: &TaskPatch) -> ClResult<()> {
	let mut query = sqlx::QueryBuilder::new("UPDATE tasks SET ");
	let mut has_fields = false;

	has_fields = push_patch!(query, has_fields, "input", &patch.input);
	has_fields = push_patch!(query, has_fields, "next_at", &patch.next_at, |v| v.0);
	has_fields = push_patch!(query, has_fields, "retry", &patch.retry);

	if has_fields {
		query.push(" WHERE task_id=").push_bind(task_id.cast_signed());
		query
			.build()
			.execute(db)
			.await
			.inspect_err(inspect)
			.map_err(|_| Error::DbError)?;
	}

	Ok(())
}

// vim: ts=4
