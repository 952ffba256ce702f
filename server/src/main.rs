use std::sync::Arc;

use farmconf::bootstrap::bootstrap;
use farmconf::config::ServerConfig;
use farmconf_config_adapter_sqlite::ConfigAdapterSqlite;
use farmconf_core::AppBuilder;
use farmconf_types::error::ClResult;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ClResult<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.with_target(false)
		.init();

	let config = ServerConfig::from_env()?;
	let adapter = ConfigAdapterSqlite::new(&config.db_dir).await?;

	let mut builder = AppBuilder::new();
	builder
		.opts(config.opts)
		.config_adapter(Arc::new(adapter))
		.on_init(|app| async move { farmconf_jobs::init(&app) });
	let app = builder.build().await?;

	bootstrap(&app).await?;
	farmconf::run(app).await
}

// vim: ts=4
