pub use crate::app::App;
pub use farmconf_types::lock;
pub use farmconf_types::prelude::*;

// vim: ts=4
