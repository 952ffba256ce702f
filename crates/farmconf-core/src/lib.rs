//! Configuration engine for farmconf.
//!
//! Holds the extension/setting catalog, requirement evaluation, the
//! per-tenant snapshot cache, the domain modules that stage and commit
//! changes, the migration coordinator and the background task scheduler.
//! Job runners live in `farmconf-jobs`; persistence is behind the adapter
//! traits of `farmconf-types`.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod app;
pub mod cache;
pub mod catalog;
pub mod dependency;
pub mod migration;
pub mod modules;
pub mod plugin;
pub mod prelude;
pub mod registry;
pub mod scheduler;

// Re-export commonly used types
pub use app::{App, AppBuilder, AppBuilderOpts, AppState};
pub use modules::{Caller, CommitOutcome, DomainModule};
pub use registry::ModuleRegistry;

// vim: ts=4
