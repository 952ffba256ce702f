//! Background jobs enqueued after configuration commits.
//!
//! Every job is a scheduler task whose parameters are the JSON documents
//! built by `farmconf_core::migration`.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod cache_purge;
pub mod namespace_migration;
pub mod script;
pub mod settings_seed;

mod prelude;

use prelude::*;

pub use cache_purge::CachePurgeTask;
pub use namespace_migration::NamespaceMigrationTask;
pub use script::ScriptTask;
pub use settings_seed::SettingsSeedTask;

/// Register every job kind with the scheduler
pub fn init(app: &App) -> ClResult<()> {
	app.scheduler.register::<NamespaceMigrationTask>()?;
	app.scheduler.register::<SettingsSeedTask>()?;
	app.scheduler.register::<ScriptTask>()?;
	app.scheduler.register::<CachePurgeTask>()?;
	Ok(())
}

// vim: ts=4
