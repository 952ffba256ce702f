//! Server configuration from `FARMCONF_*` environment variables
//!
//! | Variable                          | Default                      |
//! |-----------------------------------|------------------------------|
//! | `FARMCONF_DB_DIR`                 | `./data`                     |
//! | `FARMCONF_LISTEN`                 | `127.0.0.1:8080`             |
//! | `FARMCONF_ADMIN_KEY`              | unset (reset disabled)       |
//! | `FARMCONF_CACHE_CAPACITY`         | `10000`                      |
//! | `FARMCONF_NEGATIVE_TTL`           | `30` (seconds)               |
//! | `FARMCONF_MIGRATION_BATCH_SIZE`   | `100`                        |
//! | `FARMCONF_MIGRATION_MAX_BATCHES`  | `10`                         |
//! | `FARMCONF_SCRIPT_BINARY`          | `php`                        |
//! | `FARMCONF_SCRIPT_DIR`             | `.`                          |
//! | `FARMCONF_SCRIPT_MEMORY_KB`       | `2097152`                    |
//! | `FARMCONF_SCRIPT_FILE_SIZE_KB`    | `1048576`                    |
//! | `FARMCONF_SCRIPT_TIMEOUT`         | `3600` (seconds)             |
//! | `FARMCONF_EDGE_NODES`             | empty, comma separated       |
//! | `FARMCONF_TENANT_URL`             | `https://{tenant}.localhost/`|
//! | `FARMCONF_SYSTEM_TENANT`          | unset                        |
//! | `FARMCONF_CATALOG`                | unset (YAML catalog file)    |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use farmconf_core::app::{AppBuilderOpts, ScriptRunnerOpts};

use crate::prelude::*;

#[derive(Debug)]
pub struct ServerConfig {
	pub db_dir: PathBuf,
	pub opts: AppBuilderOpts,
}

impl ServerConfig {
	pub fn from_env() -> ClResult<Self> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Build the configuration from any variable source
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClResult<Self> {
		let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
		let defaults = AppBuilderOpts::default();
		let script_defaults = ScriptRunnerOpts::default();

		let script = ScriptRunnerOpts {
			binary: var("FARMCONF_SCRIPT_BINARY").map_or(script_defaults.binary, Into::into),
			base_dir: var("FARMCONF_SCRIPT_DIR")
				.map_or(script_defaults.base_dir, |dir| PathBuf::from(dir).into()),
			memory_limit_kb: parse(&var, "FARMCONF_SCRIPT_MEMORY_KB", script_defaults.memory_limit_kb)?,
			file_size_limit_kb: parse(
				&var,
				"FARMCONF_SCRIPT_FILE_SIZE_KB",
				script_defaults.file_size_limit_kb,
			)?,
			timeout_secs: parse(&var, "FARMCONF_SCRIPT_TIMEOUT", script_defaults.timeout_secs)?,
		};

		let system_tenant = var("FARMCONF_SYSTEM_TENANT")
			.map(|key| {
				TenantKey::new(key.trim())
					.map_err(|e| Error::ConfigError(format!("FARMCONF_SYSTEM_TENANT: {}", e)))
			})
			.transpose()?;

		let opts = AppBuilderOpts {
			listen: var("FARMCONF_LISTEN").map_or(defaults.listen, Into::into),
			admin_key: var("FARMCONF_ADMIN_KEY").map(Into::into),
			cache_capacity: parse(&var, "FARMCONF_CACHE_CAPACITY", defaults.cache_capacity)?,
			negative_ttl_secs: parse(&var, "FARMCONF_NEGATIVE_TTL", defaults.negative_ttl_secs)?,
			migration_batch_size: parse(
				&var,
				"FARMCONF_MIGRATION_BATCH_SIZE",
				defaults.migration_batch_size,
			)?,
			migration_max_batches: parse(
				&var,
				"FARMCONF_MIGRATION_MAX_BATCHES",
				defaults.migration_max_batches,
			)?,
			script,
			edge_nodes: var("FARMCONF_EDGE_NODES")
				.map(|nodes| {
					nodes
						.split(',')
						.map(str::trim)
						.filter(|node| !node.is_empty())
						.map(Into::into)
						.collect()
				})
				.unwrap_or_default(),
			tenant_url: var("FARMCONF_TENANT_URL").map_or(defaults.tenant_url, Into::into),
			system_tenant,
			catalog_file: var("FARMCONF_CATALOG").map(|path| Box::<Path>::from(PathBuf::from(path))),
		};

		Ok(Self {
			db_dir: var("FARMCONF_DB_DIR").map_or_else(|| PathBuf::from("./data"), PathBuf::from),
			opts,
		})
	}
}

fn parse<T: FromStr>(
	var: &impl Fn(&str) -> Option<String>,
	name: &str,
	default: T,
) -> ClResult<T> {
	match var(name) {
		Some(value) => value
			.trim()
			.parse()
			.map_err(|_| Error::ConfigError(format!("{}: invalid value '{}'", name, value))),
		None => Ok(default),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn config(vars: &[(&str, &str)]) -> ClResult<ServerConfig> {
		let vars: HashMap<String, String> =
			vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
		ServerConfig::from_lookup(|name| vars.get(name).cloned())
	}

	#[test]
	fn test_defaults() {
		let config = config(&[]).unwrap();
		assert_eq!(config.db_dir, PathBuf::from("./data"));
		assert_eq!(&*config.opts.listen, "127.0.0.1:8080");
		assert!(config.opts.admin_key.is_none());
		assert!(config.opts.edge_nodes.is_empty());
		assert_eq!(&*config.opts.script.binary, "php");
	}

	#[test]
	fn test_overrides() {
		let config = config(&[
			("FARMCONF_LISTEN", "0.0.0.0:9000"),
			("FARMCONF_ADMIN_KEY", "secret"),
			("FARMCONF_MIGRATION_BATCH_SIZE", "25"),
			("FARMCONF_EDGE_NODES", "10.0.0.1:80, 10.0.0.2:80,"),
			("FARMCONF_SYSTEM_TENANT", "metawiki"),
			("FARMCONF_SCRIPT_TIMEOUT", "60"),
			("FARMCONF_CATALOG", ""),
		])
		.unwrap();
		assert_eq!(&*config.opts.listen, "0.0.0.0:9000");
		assert_eq!(config.opts.admin_key.as_deref(), Some("secret"));
		assert_eq!(config.opts.migration_batch_size, 25);
		assert_eq!(config.opts.edge_nodes.len(), 2);
		assert_eq!(&*config.opts.edge_nodes[1], "10.0.0.2:80");
		assert_eq!(config.opts.system_tenant, Some(TenantKey::new("metawiki").unwrap()));
		assert_eq!(config.opts.script.timeout_secs, 60);
		assert!(config.opts.catalog_file.is_none());
	}

	#[test]
	fn test_invalid_values() {
		assert!(matches!(
			config(&[("FARMCONF_CACHE_CAPACITY", "lots")]),
			Err(Error::ConfigError(_))
		));
		assert!(matches!(
			config(&[("FARMCONF_SYSTEM_TENANT", "Meta Wiki")]),
			Err(Error::ConfigError(_))
		));
	}
}

// vim: ts=4
