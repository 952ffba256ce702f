pub use crate::error::{ClResult, Error, Violation};
pub use crate::types::{Patch, TenantKey, Timestamp};
pub use tracing::{debug, error, info, warn};

// vim: ts=4
