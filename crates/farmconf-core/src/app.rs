//! App state and builder

use std::{
	future::Future,
	path::{Path, PathBuf},
	pin::Pin,
	sync::Arc,
};

use crate::cache::{CacheStore, MemoryCacheBackend};
use crate::catalog::{self, Catalog, CatalogBuilder};
use crate::plugin::ConfigPlugin;
use crate::prelude::*;
use crate::scheduler::{self, Scheduler};
use farmconf_types::cache_adapter::CacheAdapter;
use farmconf_types::config_adapter::ConfigAdapter;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
	pub scheduler: Arc<Scheduler<App>>,
	pub opts: AppBuilderOpts,

	pub adapter: Arc<dyn ConfigAdapter>,
	pub cache: Arc<CacheStore>,
	pub catalog: Arc<Catalog>,
	pub plugins: Arc<[Arc<dyn ConfigPlugin>]>,
}

impl std::fmt::Debug for AppState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppState").field("opts", &self.opts).finish_non_exhaustive()
	}
}

pub type App = Arc<AppState>;

/// Limits and command line of the maintenance script runner
#[derive(Debug, Clone)]
pub struct ScriptRunnerOpts {
	/// Interpreter the scripts are passed to (e.g. `php`)
	pub binary: Box<str>,
	/// Directory script paths are relative to
	pub base_dir: Box<Path>,
	pub memory_limit_kb: u64,
	pub file_size_limit_kb: u64,
	pub timeout_secs: u64,
}

impl Default for ScriptRunnerOpts {
	fn default() -> Self {
		Self {
			binary: "php".into(),
			base_dir: PathBuf::from(".").into(),
			memory_limit_kb: 2 * 1024 * 1024,
			file_size_limit_kb: 1024 * 1024,
			timeout_secs: 3600,
		}
	}
}

#[derive(Debug, Clone)]
pub struct AppBuilderOpts {
	pub listen: Box<str>,
	/// Pre-shared key of the administrative reset endpoint (disabled if unset)
	pub admin_key: Option<Box<str>>,
	pub cache_capacity: usize,
	/// How long an unknown tenant is remembered
	pub negative_ttl_secs: u32,
	/// Pages moved per migration batch
	pub migration_batch_size: u32,
	/// Batches per migration run before the job re-enqueues itself
	pub migration_max_batches: u32,
	pub script: ScriptRunnerOpts,
	/// Edge cache nodes receiving PURGE requests
	pub edge_nodes: Vec<Box<str>>,
	/// Front-door URL of a tenant, `{tenant}` is replaced by the tenant key
	pub tenant_url: Box<str>,
	/// Tenant provisioned at startup if it does not exist
	pub system_tenant: Option<TenantKey>,
	pub catalog_file: Option<Box<Path>>,
}

impl Default for AppBuilderOpts {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:8080".into(),
			admin_key: None,
			cache_capacity: 10_000,
			negative_ttl_secs: 30,
			migration_batch_size: 100,
			migration_max_batches: 10,
			script: ScriptRunnerOpts::default(),
			edge_nodes: Vec::new(),
			tenant_url: "https://{tenant}.localhost/".into(),
			system_tenant: None,
			catalog_file: None,
		}
	}
}

impl AppBuilderOpts {
	pub fn tenant_url(&self, tenant: &TenantKey) -> String {
		self.tenant_url.replace("{tenant}", tenant.as_str())
	}
}

/// Type alias for async initialization callbacks
type InitCallback =
	Box<dyn FnOnce(App) -> Pin<Box<dyn Future<Output = ClResult<()>> + Send>> + Send>;

pub struct AppBuilder {
	opts: AppBuilderOpts,
	adapter: Option<Arc<dyn ConfigAdapter>>,
	cache_backend: Option<Arc<dyn CacheAdapter>>,
	task_store: Option<Arc<dyn scheduler::TaskStore<App>>>,
	catalog: CatalogBuilder,
	plugins: Vec<Arc<dyn ConfigPlugin>>,
	on_init: Vec<InitCallback>,
}

impl AppBuilder {
	pub fn new() -> Self {
		AppBuilder {
			opts: AppBuilderOpts::default(),
			adapter: None,
			cache_backend: None,
			task_store: None,
			catalog: CatalogBuilder::new(),
			plugins: Vec::new(),
			on_init: Vec::new(),
		}
	}

	// Opts
	pub fn opts(&mut self, opts: AppBuilderOpts) -> &mut Self {
		self.opts = opts;
		self
	}
	pub fn listen(&mut self, listen: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen = listen.into();
		self
	}
	pub fn admin_key(&mut self, admin_key: impl Into<Box<str>>) -> &mut Self {
		self.opts.admin_key = Some(admin_key.into());
		self
	}
	pub fn cache_capacity(&mut self, capacity: usize) -> &mut Self {
		self.opts.cache_capacity = capacity;
		self
	}
	pub fn negative_ttl_secs(&mut self, secs: u32) -> &mut Self {
		self.opts.negative_ttl_secs = secs;
		self
	}
	pub fn migration_batch_size(&mut self, size: u32) -> &mut Self {
		self.opts.migration_batch_size = size.max(1);
		self
	}
	pub fn migration_max_batches(&mut self, batches: u32) -> &mut Self {
		self.opts.migration_max_batches = batches.max(1);
		self
	}
	pub fn script_runner(&mut self, script: ScriptRunnerOpts) -> &mut Self {
		self.opts.script = script;
		self
	}
	pub fn edge_nodes(&mut self, nodes: impl IntoIterator<Item = impl Into<Box<str>>>) -> &mut Self {
		self.opts.edge_nodes = nodes.into_iter().map(Into::into).collect();
		self
	}
	pub fn tenant_url(&mut self, template: impl Into<Box<str>>) -> &mut Self {
		self.opts.tenant_url = template.into();
		self
	}
	pub fn system_tenant(&mut self, tenant: TenantKey) -> &mut Self {
		self.opts.system_tenant = Some(tenant);
		self
	}
	pub fn catalog_file(&mut self, path: impl Into<Box<Path>>) -> &mut Self {
		self.opts.catalog_file = Some(path.into());
		self
	}

	// Adapters
	pub fn config_adapter(&mut self, adapter: Arc<dyn ConfigAdapter>) -> &mut Self {
		self.adapter = Some(adapter);
		self
	}
	pub fn cache_backend(&mut self, backend: Arc<dyn CacheAdapter>) -> &mut Self {
		self.cache_backend = Some(backend);
		self
	}
	/// Override the task store (defaults to the config adapter's task table)
	pub fn task_store(&mut self, store: Arc<dyn scheduler::TaskStore<App>>) -> &mut Self {
		self.task_store = Some(store);
		self
	}

	/// Catalog under construction, for registering extensions and settings
	pub fn catalog(&mut self) -> &mut CatalogBuilder {
		&mut self.catalog
	}

	pub fn plugin(&mut self, plugin: Arc<dyn ConfigPlugin>) -> &mut Self {
		self.plugins.push(plugin);
		self
	}

	/// Register an async initialization callback that runs after App is created
	/// but before the scheduler starts. Use this to register task types.
	pub fn on_init<F, Fut>(&mut self, f: F) -> &mut Self
	where
		F: FnOnce(App) -> Fut + Send + 'static,
		Fut: Future<Output = ClResult<()>> + Send + 'static,
	{
		self.on_init.push(Box::new(move |app| Box::pin(f(app))));
		self
	}

	pub async fn build(mut self) -> ClResult<App> {
		info!("farmconf V{}", VERSION);

		let Some(adapter) = self.adapter else {
			error!("FATAL: No config adapter configured");
			return Err(Error::Internal("No config adapter configured".to_string()));
		};

		catalog::register_core_catalog(&mut self.catalog)?;
		if let Some(path) = &self.opts.catalog_file {
			self.catalog.load_yaml_file(path).await.inspect_err(|e| {
				error!("FATAL: Cannot load catalog: {}", e);
			})?;
		}
		info!("Registered {} catalog entries", self.catalog.len());
		let catalog = Arc::new(self.catalog.freeze());

		let cache_backend = self
			.cache_backend
			.unwrap_or_else(|| MemoryCacheBackend::new(self.opts.cache_capacity));
		let plugins: Arc<[Arc<dyn ConfigPlugin>]> = self.plugins.into();
		for plugin in plugins.iter() {
			info!("Registered config plugin {}", plugin.name());
		}
		let cache = Arc::new(CacheStore::new(
			cache_backend,
			adapter.clone(),
			plugins.clone(),
			self.opts.negative_ttl_secs,
		));

		let task_store = self
			.task_store
			.unwrap_or_else(|| scheduler::AdapterTaskStore::new(adapter.clone()));

		let app: App = Arc::new(AppState {
			scheduler: Scheduler::new(task_store),
			opts: self.opts,
			adapter,
			cache,
			catalog,
			plugins,
		});

		// Run custom init callbacks
		for callback in self.on_init {
			callback(app.clone()).await?;
		}

		// Start scheduler
		app.scheduler.start(app.clone());

		// Start periodic scheduler health check (every 30 seconds)
		{
			let scheduler = app.scheduler.clone();
			tokio::spawn(async move {
				loop {
					tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
					match scheduler.health_check().await {
						Ok(health) => {
							debug!(
								"Scheduler health: scheduled={}, running={}",
								health.scheduled, health.running
							);
							if !health.overdue_tasks.is_empty() {
								error!(
									"SCHEDULER: {} overdue tasks detected: {:?}",
									health.overdue_tasks.len(),
									health.overdue_tasks
								);
							}
						}
						Err(e) => {
							warn!("Scheduler health check failed: {}", e);
						}
					}
				}
			});
		}

		Ok(app)
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_tenant_url() {
		let opts = AppBuilderOpts {
			tenant_url: "https://{tenant}.wikifarm.example/wiki/".into(),
			..Default::default()
		};
		assert_eq!(
			opts.tenant_url(&TenantKey::new("wikidb").unwrap()),
			"https://wikidb.wikifarm.example/wiki/"
		);
	}

	#[tokio::test]
	async fn test_build_requires_adapter() {
		let builder = AppBuilder::new();
		assert!(matches!(builder.build().await, Err(Error::Internal(_))));
	}
}

// vim: ts=4
