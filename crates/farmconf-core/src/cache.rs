//! Per-tenant configuration snapshot cache
//!
//! Snapshots are stored serialized in a pluggable `CacheAdapter` under a key
//! built by `cache_key`. Entries have no TTL: they live until `invalidate`
//! (after a commit or an administrative reset) or until the backend evicts
//! them. A miss rebuilds the record from the `ConfigAdapter`.
//!
//! Concurrent misses for one tenant are coalesced by a per-tenant build slot,
//! which only exists while a build is in flight. Every invalidation bumps the
//! slot's epoch; a rebuild that started before an invalidation is returned to
//! its caller but never stored. A tenant whose backend delete failed is read
//! from the source of truth until a delete or a fresh store succeeds.

use async_trait::async_trait;
use lru::LruCache;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::plugin::ConfigPlugin;
use crate::prelude::*;
use farmconf_types::cache_adapter::CacheAdapter;
use farmconf_types::config_adapter::ConfigAdapter;
use farmconf_types::record::ConfigRecord;

/// Bumped whenever the serialized `ConfigRecord` layout changes
pub const SCHEMA_VERSION: u32 = 1;

const DEFAULT_NEGATIVE_CAPACITY: usize = 1024;

/// Cache key of a tenant's snapshot
pub fn cache_key(tenant: &TenantKey) -> String {
	format!("farmconf:config:v{}:{}", SCHEMA_VERSION, tenant)
}

// MemoryCacheBackend //
//********************//
/// In-process LRU cache backend
#[derive(Debug)]
pub struct MemoryCacheBackend {
	entries: parking_lot::Mutex<LruCache<Box<str>, Box<str>>>,
}

impl MemoryCacheBackend {
	pub fn new(capacity: usize) -> Arc<Self> {
		let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
		Arc::new(Self { entries: parking_lot::Mutex::new(LruCache::new(capacity)) })
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

#[async_trait]
impl CacheAdapter for MemoryCacheBackend {
	async fn get(&self, key: &str) -> ClResult<Option<Box<str>>> {
		Ok(self.entries.lock().get(key).cloned())
	}

	async fn set(&self, key: &str, value: &str) -> ClResult<()> {
		self.entries.lock().put(key.into(), value.into());
		Ok(())
	}

	async fn delete(&self, key: &str) -> ClResult<()> {
		self.entries.lock().pop(key);
		Ok(())
	}
}

// CacheStore //
//************//
#[derive(Default)]
struct BuildSlot {
	lock: tokio::sync::Mutex<()>,
	epoch: AtomicU64,
}

pub struct CacheStore {
	backend: Arc<dyn CacheAdapter>,
	adapter: Arc<dyn ConfigAdapter>,
	plugins: Arc<[Arc<dyn ConfigPlugin>]>,
	build_slots: parking_lot::Mutex<HashMap<TenantKey, Arc<BuildSlot>>>,
	/// Tenants whose cached entry could not be deleted
	stale: parking_lot::Mutex<HashSet<TenantKey>>,
	/// Unknown tenants, with the time the entry expires
	negative: parking_lot::Mutex<LruCache<TenantKey, Timestamp>>,
	negative_ttl: i64,
	last_version: AtomicU64,
}

impl std::fmt::Debug for CacheStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CacheStore")
			.field("plugins", &self.plugins.len())
			.field("negative_ttl", &self.negative_ttl)
			.finish_non_exhaustive()
	}
}

impl CacheStore {
	pub fn new(
		backend: Arc<dyn CacheAdapter>,
		adapter: Arc<dyn ConfigAdapter>,
		plugins: Arc<[Arc<dyn ConfigPlugin>]>,
		negative_ttl_secs: u32,
	) -> Self {
		let capacity = NonZeroUsize::new(DEFAULT_NEGATIVE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
		Self {
			backend,
			adapter,
			plugins,
			build_slots: parking_lot::Mutex::new(HashMap::new()),
			stale: parking_lot::Mutex::new(HashSet::new()),
			negative: parking_lot::Mutex::new(LruCache::new(capacity)),
			negative_ttl: i64::from(negative_ttl_secs),
			last_version: AtomicU64::new(0),
		}
	}

	/// Snapshot of a tenant's configuration, built on a miss
	pub async fn get(&self, tenant: &TenantKey) -> ClResult<Arc<ConfigRecord>> {
		let key = cache_key(tenant);
		if let Some(record) = self.cached(tenant, &key).await {
			return Ok(record);
		}
		self.check_negative(tenant)?;

		let slot = self.acquire_slot(tenant);
		let res = self.build_in_slot(tenant, &key, &slot).await;
		self.release_slot(tenant, slot);
		res
	}

	async fn build_in_slot(
		&self,
		tenant: &TenantKey,
		key: &str,
		slot: &BuildSlot,
	) -> ClResult<Arc<ConfigRecord>> {
		let _guard = slot.lock.lock().await;

		// Another caller may have finished the build while we waited
		if let Some(record) = self.cached(tenant, key).await {
			return Ok(record);
		}
		self.check_negative(tenant)?;

		let epoch = slot.epoch.load(Ordering::SeqCst);
		let record = match self.build_record(tenant).await {
			Ok(record) => Arc::new(record),
			Err(Error::UnknownTenant(t)) => {
				self.negative.lock().put(t.clone(), Timestamp::from_now(self.negative_ttl));
				return Err(Error::UnknownTenant(t));
			}
			Err(e) => return Err(e),
		};

		if slot.epoch.load(Ordering::SeqCst) == epoch {
			let value = serde_json::to_string(&*record)?;
			match self.backend.set(key, &value).await {
				Ok(()) => {
					self.stale.lock().remove(tenant);
				}
				Err(e) => warn!(tenant = %tenant, "Cannot store snapshot: {}", e),
			}
			// An invalidation may have slipped in between the check and the store
			if slot.epoch.load(Ordering::SeqCst) != epoch {
				self.delete_entry(tenant, key).await?;
			}
		} else {
			debug!(tenant = %tenant, "Snapshot invalidated during rebuild, not storing");
		}

		debug!(tenant = %tenant, cache_version = record.cache_version, "Built configuration snapshot");
		Ok(record)
	}

	/// Drop a tenant's snapshot; the next `get` rebuilds it
	pub async fn invalidate(&self, tenant: &TenantKey) -> ClResult<()> {
		if let Some(slot) = self.build_slots.lock().get(tenant) {
			slot.epoch.fetch_add(1, Ordering::SeqCst);
		}
		self.negative.lock().pop(tenant);
		self.delete_entry(tenant, &cache_key(tenant)).await?;
		debug!(tenant = %tenant, "Invalidated configuration snapshot");
		Ok(())
	}

	/// Tenants with a snapshot build in flight
	pub fn pending_builds(&self) -> usize {
		self.build_slots.lock().len()
	}

	/// Whether reads of the tenant bypass the cached entry
	pub fn is_stale(&self, tenant: &TenantKey) -> bool {
		self.stale.lock().contains(tenant)
	}

	async fn delete_entry(&self, tenant: &TenantKey, key: &str) -> ClResult<()> {
		match self.backend.delete(key).await {
			Ok(()) => {
				self.stale.lock().remove(tenant);
				Ok(())
			}
			Err(e) => {
				self.stale.lock().insert(tenant.clone());
				Err(e)
			}
		}
	}

	async fn cached(&self, tenant: &TenantKey, key: &str) -> Option<Arc<ConfigRecord>> {
		if self.is_stale(tenant) {
			// Retry the delete, the entry is not served either way
			if let Err(e) = self.delete_entry(tenant, key).await {
				debug!(tenant = %tenant, "Stale snapshot still cached: {}", e);
				return None;
			}
		}
		self.lookup(key).await
	}

	/// Compare the cached snapshot with the source of truth
	///
	/// Returns true (after invalidating) if the snapshot was stale.
	pub async fn verify(&self, tenant: &TenantKey) -> ClResult<bool> {
		let Some(cached) = self.lookup(&cache_key(tenant)).await else {
			return Ok(false);
		};
		let row = self.adapter.read_tenant(tenant).await.map_err(|e| unknown_tenant(e, tenant))?;
		if cached.source_version == row.config_version {
			return Ok(false);
		}

		warn!(
			tenant = %tenant,
			"Stale snapshot: cached version {}, stored version {}",
			cached.source_version,
			row.config_version
		);
		self.invalidate(tenant).await?;
		Ok(true)
	}

	/// Assemble a record from the source of truth and run snapshot plugins
	pub async fn build_record(&self, tenant: &TenantKey) -> ClResult<ConfigRecord> {
		let row = self.adapter.read_tenant(tenant).await.map_err(|e| unknown_tenant(e, tenant))?;
		let extensions = self.adapter.read_extensions(tenant).await?;
		let settings = self.adapter.list_settings(tenant).await?;
		let namespaces = self.adapter.list_namespaces(tenant).await?;
		let permissions = self.adapter.list_permissions(tenant).await?;

		let mut record = ConfigRecord {
			tenant: row.tenant,
			core: row.core,
			extensions: extensions.into_iter().collect(),
			settings,
			namespaces,
			permissions,
			extra: BTreeMap::new(),
			source_version: row.config_version,
			cache_version: 0,
		};

		let mut extra = BTreeMap::new();
		for plugin in self.plugins.iter() {
			plugin.extend_snapshot(&record, &mut extra).await.inspect_err(|e| {
				error!(tenant = %tenant, "Snapshot plugin {} failed: {}", plugin.name(), e);
			})?;
		}
		record.extra = extra;
		record.cache_version = self.next_version();

		Ok(record)
	}

	async fn lookup(&self, key: &str) -> Option<Arc<ConfigRecord>> {
		let value = match self.backend.get(key).await {
			Ok(value) => value?,
			Err(e) => {
				warn!("Cache backend read failed for {}: {}", key, e);
				return None;
			}
		};
		match serde_json::from_str::<ConfigRecord>(&value) {
			Ok(record) => Some(Arc::new(record)),
			Err(e) => {
				warn!("Dropping undecodable cache entry {}: {}", key, e);
				if let Err(e) = self.backend.delete(key).await {
					warn!("Cannot drop cache entry {}: {}", key, e);
				}
				None
			}
		}
	}

	fn check_negative(&self, tenant: &TenantKey) -> ClResult<()> {
		let mut negative = self.negative.lock();
		match negative.get(tenant).copied() {
			Some(expires) if expires > Timestamp::now() => Err(Error::UnknownTenant(tenant.clone())),
			Some(_) => {
				negative.pop(tenant);
				Ok(())
			}
			None => Ok(()),
		}
	}

	fn acquire_slot(&self, tenant: &TenantKey) -> Arc<BuildSlot> {
		self.build_slots.lock().entry(tenant.clone()).or_default().clone()
	}

	fn release_slot(&self, tenant: &TenantKey, slot: Arc<BuildSlot>) {
		let mut slots = self.build_slots.lock();
		// Held by the map and by this caller only
		if Arc::strong_count(&slot) == 2 {
			slots.remove(tenant);
		}
	}

	/// Wall clock in microseconds, strictly increasing across builds
	fn next_version(&self) -> u64 {
		let now = SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
			.unwrap_or_default();
		let prev = self
			.last_version
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
			.unwrap_or_default();
		now.max(prev + 1)
	}
}

fn unknown_tenant(err: Error, tenant: &TenantKey) -> Error {
	match err {
		Error::NotFound => Error::UnknownTenant(tenant.clone()),
		err => err,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cache_key() {
		let tenant = TenantKey::new("wikidb").unwrap();
		assert_eq!(cache_key(&tenant), format!("farmconf:config:v{}:wikidb", SCHEMA_VERSION));
	}

	#[tokio::test]
	async fn test_memory_backend_lru() {
		let backend = MemoryCacheBackend::new(2);
		backend.set("a", "1").await.unwrap();
		backend.set("b", "2").await.unwrap();
		assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("1"));
		backend.set("c", "3").await.unwrap();
		// "b" was least recently used
		assert!(backend.get("b").await.unwrap().is_none());
		backend.delete("a").await.unwrap();
		assert_eq!(backend.len(), 1);
	}
}

// vim: ts=4
