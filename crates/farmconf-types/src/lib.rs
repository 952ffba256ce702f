//! Shared types, adapter traits, and core utilities for farmconf.
//!
//! This crate contains the foundational types shared between the engine
//! crate, the job runners and all adapter implementations. Keeping them in a
//! separate crate lets adapters compile without pulling in the engine.

pub mod cache_adapter;
pub mod config_adapter;
pub mod diff;
pub mod error;
pub mod prelude;
pub mod record;
pub mod types;

/// Lock a `std::sync::Mutex`, mapping poisoning to `Error::Internal`
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
}

// vim: ts=4
