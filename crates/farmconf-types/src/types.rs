//! Common types used throughout farmconf.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::error::{ClResult, Error};

pub type PageId = u64;
pub type TaskId = u64;

// TenantKey //
//***********//
/// Unique identifier of one tenant (wiki database name, e.g. `wikidb`)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantKey(Box<str>);

impl TenantKey {
	pub const MAX_LEN: usize = 64;

	/// Tenant keys are lowercase ASCII letters, digits and underscores
	pub fn new(key: impl AsRef<str>) -> ClResult<Self> {
		let key = key.as_ref();
		if key.is_empty() || key.len() > Self::MAX_LEN {
			return Err(Error::ValidationError(format!("Invalid tenant key length: '{}'", key)));
		}
		if !key.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
			return Err(Error::ValidationError(format!("Invalid tenant key: '{}'", key)));
		}
		Ok(Self(key.into()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for TenantKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl TryFrom<String> for TenantKey {
	type Error = Error;

	fn try_from(value: String) -> ClResult<Self> {
		Self::new(value)
	}
}

impl From<TenantKey> for String {
	fn from(key: TenantKey) -> Self {
		key.0.into()
	}
}

impl std::str::FromStr for TenantKey {
	type Err = Error;

	fn from_str(s: &str) -> ClResult<Self> {
		Self::new(s)
	}
}

// Timestamp //
//***********//
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(i64::try_from(res.as_secs()).unwrap_or(i64::MAX))
	}

	pub fn from_now(seconds: i64) -> Timestamp {
		Self::now().add_seconds(seconds)
	}

	pub fn add_seconds(&self, seconds: i64) -> Timestamp {
		Timestamp(self.0.saturating_add(seconds))
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// Patch //
//*******//
/// Three-state field update: leave as is, clear, or set
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Patch<T> {
	#[default]
	Undefined,
	Null,
	Value(T),
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_tenant_key_validation() {
		assert!(TenantKey::new("wikidb").is_ok());
		assert!(TenantKey::new("meta_wiki2").is_ok());
		assert!(TenantKey::new("").is_err());
		assert!(TenantKey::new("Wiki").is_err());
		assert!(TenantKey::new("wiki:db").is_err());
		assert!(TenantKey::new("a".repeat(65)).is_err());
	}

	#[test]
	fn test_tenant_key_serde() {
		let key: TenantKey = serde_json::from_str("\"wikidb\"").unwrap();
		assert_eq!(key.as_str(), "wikidb");
		assert!(serde_json::from_str::<TenantKey>("\"Bad Key\"").is_err());
	}

	#[test]
	fn test_timestamp_arith() {
		let ts = Timestamp(100);
		assert_eq!(ts.add_seconds(20), Timestamp(120));
		assert!(Timestamp::from_now(10) > Timestamp::now());
	}
}

// vim: ts=4
