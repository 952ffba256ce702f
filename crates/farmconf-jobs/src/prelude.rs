pub use farmconf_core::prelude::*;

// vim: ts=4
