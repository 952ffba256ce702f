//! Snapshot and commit hooks
//!
//! Plugins are registered on the `AppBuilder` before startup and frozen into
//! `AppState`; the list never changes while the app runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::prelude::*;
use farmconf_types::diff::ConfigDiff;
use farmconf_types::record::ConfigRecord;

#[async_trait]
pub trait ConfigPlugin: Debug + Send + Sync {
	fn name(&self) -> &str;

	/// Append keys to a record being built, before it is frozen and cached
	async fn extend_snapshot(
		&self,
		_record: &ConfigRecord,
		_extra: &mut BTreeMap<Box<str>, serde_json::Value>,
	) -> ClResult<()> {
		Ok(())
	}

	/// Inspect a changeset before it is written; an error aborts the commit
	async fn before_commit(
		&self,
		_tenant: &TenantKey,
		_candidate: &ConfigRecord,
		_diff: &ConfigDiff,
	) -> ClResult<()> {
		Ok(())
	}
}

// vim: ts=4
