//! Key-value cache backend used for configuration snapshots.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::prelude::*;

/// A farmconf cache adapter
///
/// Keys are opaque strings built by the cache store, values are serialized
/// snapshots. A backend may evict entries at any time; callers never rely on
/// an entry being present.
#[async_trait]
pub trait CacheAdapter: Debug + Send + Sync {
	async fn get(&self, key: &str) -> ClResult<Option<Box<str>>>;
	async fn set(&self, key: &str, value: &str) -> ClResult<()>;
	async fn delete(&self, key: &str) -> ClResult<()>;
}

// vim: ts=4
